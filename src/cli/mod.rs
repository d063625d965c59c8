//! CLI commands for edgepool
//!
//! ```bash
//! # Signed GET against the host from ~/.edgerc
//! edgepool get /papi/v1/groups
//!
//! # POST a JSON body
//! edgepool post /papi/v1/properties --data '{"productId":"prd_SPM"}'
//!
//! # Health report after one probe request
//! edgepool health --probe /papi/v1/contracts
//! ```

pub mod commands;

pub use commands::{cmd_health, cmd_request, parse_header};

//! Access to the replication control plane.

mod base;
mod http;
mod script;

pub use base::{
    ControlPlane, ControlPlaneConnector, RESULT_ALREADY_CONNECTED, RESULT_OK, ResultTable,
    ScriptOutput, ScriptResponse,
};
pub use http::{HttpControlPlane, HttpControlPlaneConnector};
pub use script::{
    ReplicationStatus, STATE_FAILED, STATE_MIRROR_CONTINUOUS, Script, SourceColumn,
    split_table_name,
};

//! Stream-facing half of the pipeline: subscription descriptors, the
//! transport seam, and the connection lifecycle manager.

pub mod manager;
pub mod subscription;
pub mod transport;

pub use manager::{ConnectError, ConnectionConfig, ConnectionState, StreamConnectionManager};
pub use subscription::{
    build_program_filters, AccountFilter, Commitment, SubscriptionError, SubscriptionFilters,
    TransactionFilter,
};
pub use transport::{StreamSession, StreamTransport, StreamUpdate, TransportError};

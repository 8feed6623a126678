mod gauge_source;
mod metric_store;
mod transport;

pub use gauge_source::GaugeSource;
pub use metric_store::MetricStore;
pub use transport::{DeliveryStatus, Transport, TransportError};

//! Message dispatch
//!
//! Messages are validated at [`Dispatcher::queue`] time, held in an
//! [`OutboundQueue`], and drained by a scheduler-driven flush into a single
//! [`DeliverySink`].

pub mod connectivity;
pub mod dispatcher;
pub mod engine;
pub mod queue;
pub mod sink;

pub use self::connectivity::TestConnectivity;
pub use self::dispatcher::{
    Admission, DeviceDispatcher, DeviceRole, DispatchBase, Dispatcher, EnterpriseDispatcher,
    EnterpriseRole, RoleDispatcher,
};
pub use self::engine::{DispatchCore, DispatchEvent, DispatchPolicy, FlushSummary};
pub use self::queue::{OutboundQueue, QueuedMessage};
pub use self::sink::{DeliveryReport, DeliverySink, HttpsDeliverySink, MqttDeliverySink};

pub mod age_meter;
pub mod clock;
pub mod destination;
pub mod frame;
pub mod policy;
pub mod queues;
pub mod scheduler;
pub mod sensor;
pub mod source_engine;
pub mod source_key;
pub mod source_state;
pub mod transport;

pub use age_meter::AgeReport;
pub use clock::{SourceClockSync, ClockOffset};
pub use destination::engine::{DestinationEngine, DestinationEngineConfig};
pub use destination::receiver::apply_delivery;
pub use frame::{DataType, Frame, FrameError, StreamDecoder};
pub use policy::Policy;
pub use queues::SourceQueues;
pub use scheduler::{MafScheduler, NoneScheduler, Scheduler, WiFreshScheduler};
pub use sensor::{Sensor, SensorConfig};
pub use source_engine::{SourceEngine, SourceEngineConfig};
pub use source_key::SourceKey;
pub use source_state::{FragmentOutcome, SourceLifecycle, SourceState};
pub use transport::{Endpoint, Transport, TcpTransport, TransportEvent, UdpTransport, WireMessage};

//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements          | Connects to                |
//! |--------------|---------------------|----------------------------|
//! | `log_sink`   | EventSink           | `log` facade               |
//! | `sim_device` | DevicePort          | In-memory controller model |
//! |              | TagEndpoint         | Simulated field            |
//! | `sim_host`   | TagDispatchPort     | Logging dispatcher         |
//! |              | FeedbackPort        | Logging feedback           |
//! |              | CardEmulationPort   | Logging HCE manager        |
//! | `store`      | ConfigPort          | In-memory key/value store  |
//! |              | StoragePort         |                            |
//! | `time`       | Clock               | Monotonic / manual clock   |

pub mod log_sink;
pub mod sim_device;
pub mod sim_host;
pub mod store;
pub mod time;

pub mod camera;
pub mod reconnector;
pub mod serial;

pub use camera::{CameraConnector, CameraPanel, CameraWatcher};
pub use reconnector::{Connector, DeviceReconnector, DeviceStatus};
pub use serial::{LineWriter, SerialConnector, UsbId};

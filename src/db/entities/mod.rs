pub mod device;
pub mod device_type;
pub mod polling_history;

pub mod prelude {
    pub use super::device::Entity as Device;
    pub use super::device_type::Entity as DeviceType;
    pub use super::polling_history::Entity as PollingHistory;
}

pub mod demo;
pub mod mtn;
pub mod ogate;

pub use demo::DemoProvider;
pub use mtn::MtnProvider;
pub use ogate::OgateProvider;

pub use ash::{self, vk};

pub use command::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use frame::*;
pub use reclaim::*;
pub use scene::*;
pub use swapchain::*;
pub use update::*;

mod command;
mod config;
mod device;
mod error;
mod frame;
pub mod headless;
mod reclaim;
mod scene;
mod swapchain;
mod update;

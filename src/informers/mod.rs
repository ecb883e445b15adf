pub mod factory;
pub mod shared_informer;

pub use factory::{InformerDescriptor, SharedInformerFactory};
pub use shared_informer::{ResourceType, SharedInformer};

pub mod memory;

pub use memory::MemoryRegistry;

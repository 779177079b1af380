pub mod buffer_graph;
pub mod clock;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod output;
pub mod render;
pub mod stretcher;
pub mod types;

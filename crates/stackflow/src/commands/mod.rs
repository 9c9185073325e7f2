pub mod apply;
pub mod destroy;
pub mod plan;
pub mod state;
pub mod synth;
pub mod validate;

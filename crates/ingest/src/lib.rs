pub mod classify;
pub mod company;
pub mod normalize;
pub mod pipeline;
pub mod source;

mod frame;
pub mod itsa;

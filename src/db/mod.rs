mod pool;
mod value;

pub use pool::*;
pub use value::*;

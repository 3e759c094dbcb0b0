// Video decomposition: frame sampling and the scratch space it writes into.

pub mod sampler;
pub mod scratch;

/// Size of a freshly created pool when the request fits into it: 128 MiB.
pub const DEFAULT_POOL_SIZE: usize = 128 * 1024 * 1024;

/// Alignment of every block handed out by the pool allocator.
pub const POOL_BLOCK_ALIGN: usize = 8;

/// Environment variable that forces heap-backed pools when set to a truthy value.
pub const POOL_NO_MMAP_ENV: &str = "HDRL_POOL_NO_MMAP";

/// Approximate memory budget of one collapse row block (input planes of all
/// images plus masks). Default: 2 MiB.
pub const DEFAULT_BLOCK_BYTES: usize = 2 * 1024 * 1024;

/// Scale factor turning a median absolute deviation into a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Default lower and upper kappa for sigma clipping.
pub const DEFAULT_KAPPA: f64 = 3.0;

/// Default number of sigma-clip iterations.
pub const DEFAULT_CLIP_ITERATIONS: usize = 3;

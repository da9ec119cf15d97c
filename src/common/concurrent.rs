pub(crate) mod constants;
pub(crate) mod interrupt;
pub(crate) mod thread_pool;

pub mod alien;
pub mod exe;
pub mod megacli;

pub(crate) mod crate_private {
    pub trait Sealed {}
}

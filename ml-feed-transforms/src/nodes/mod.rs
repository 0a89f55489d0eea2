//! Concrete transform nodes

mod closure;
mod crop;
mod file;
mod identity;
mod normalize;
mod zeros;

pub use closure::FnNode;
pub use crop::BoxCrop;
pub use file::{write_array_file, ArrayFileLoader};
pub use identity::Identity;
pub use normalize::Normalize;
pub use zeros::ZeroArray;

fn names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

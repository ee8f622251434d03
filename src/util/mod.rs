pub mod adf;
pub mod markup;

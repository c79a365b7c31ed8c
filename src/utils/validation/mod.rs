//! Input validation for model artifacts and tensors

mod model;
mod tensor;

pub use model::ModelValidator;
pub use tensor::TensorValidator;

pub mod codegen;
pub mod driver;
pub mod errors;
pub mod interpreter;
pub mod ir;
pub mod parser;
pub mod session;

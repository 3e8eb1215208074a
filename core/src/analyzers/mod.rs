//! file: core/src/analyzers/mod.rs
//! description: analysis passes that run before lowering.
//!
//! Every pass here reads the module AST and produces a read-only table;
//! none of them emit target text.
//!
pub mod classes;
pub mod infer;
pub mod kind;
pub mod prepass;
pub mod table;
pub mod walk;

pub use classes::{ClassInfo, ClassRegistry, FieldInfo, MethodInfo};
pub use infer::{FunctionSig, MODULE_SCOPE, TypeInferrer, literal_type};
pub use kind::{InferredType, ValueRepr};
pub use prepass::{ClosureVarSet, LambdaVarSet, ModuleFacts, ScopeFacts};
pub use table::{Binding, ScopeStack};

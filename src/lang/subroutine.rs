use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bytecode::compile::Compiler;
use crate::bytecode::compile_error::CompileError;
use crate::lang::expr::{Expr, ExprKind};
use crate::lang::scratch_var::ScratchVar;
use crate::lang::types::ValueType;

// =============================================================================
// Identity
// =============================================================================

/// Unique id of a subroutine definition within one [`Compiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubroutineId(pub u32);

impl std::fmt::Display for SubroutineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subroutine#{}", self.0)
    }
}

// =============================================================================
// Parameters & arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    /// The callee receives a copy of the value.
    ByValue,

    /// The callee receives the caller's slot and may write through it.
    ByRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub mode: ParamMode,

    /// Type the argument must be compatible with. For a by-reference
    /// parameter this is the storage type of the variable passed in, and the
    /// body's handle stores with this type.
    pub ty: ValueType,
}

impl Param {
    pub fn value(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            mode: ParamMode::ByValue,
            ty: ValueType::Any,
        }
    }

    pub fn by_ref(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            mode: ParamMode::ByRef,
            ty: ValueType::Any,
        }
    }

    pub fn typed(mut self, ty: ValueType) -> Self {
        self.ty = ty;
        self
    }
}

/// One actual argument at a call site, or one parameter handle inside a body.
///
/// Inside a body, a by-value parameter is an [`Arg::Value`] that loads the
/// parameter, and a by-reference parameter is an [`Arg::Var`] aliasing the
/// caller's variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Expr),
    Var(ScratchVar),
}

impl Arg {
    /// The value expression of a by-value handle.
    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Arg::Value(e) => Some(e),
            Arg::Var(_) => None,
        }
    }

    /// The variable of a by-reference handle.
    pub fn var(&self) -> Option<&ScratchVar> {
        match self {
            Arg::Var(v) => Some(v),
            Arg::Value(_) => None,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Arg::Value(e) => e.value_type(),
            Arg::Var(v) => v.storage_type(),
        }
    }
}

impl From<Expr> for Arg {
    fn from(e: Expr) -> Self {
        Arg::Value(e)
    }
}

impl From<ScratchVar> for Arg {
    fn from(v: ScratchVar) -> Self {
        Arg::Var(v)
    }
}

impl From<&ScratchVar> for Arg {
    fn from(v: &ScratchVar) -> Self {
        Arg::Var(v.clone())
    }
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Value(e) => write!(f, "{}", e),
            Arg::Var(v) => write!(f, "(ref {})", v.slot()),
        }
    }
}

// =============================================================================
// Definitions
// =============================================================================

/// Builds a subroutine body from its parameter handles.
///
/// Runs once, when the subroutine is declared. The compiler is available for
/// creating local variables and looking up other subroutines.
pub type SubroutineBody =
    dyn Fn(&mut Compiler, &Subroutine, &[Arg]) -> Result<Expr, CompileError>;

struct SubroutineDef {
    id: SubroutineId,
    name: String,
    params: Vec<Param>,
    return_type: ValueType,
    body: Box<SubroutineBody>,
}

/// A named, parameterized body. Cheap to clone; clones share the definition.
///
/// Definitions are created by [`Compiler::subroutine`]. Two handles are equal
/// iff they refer to the same id.
#[derive(Clone)]
pub struct Subroutine(Rc<SubroutineDef>);

impl Subroutine {
    pub(crate) fn new(
        id: SubroutineId,
        name: String,
        params: Vec<Param>,
        return_type: ValueType,
        body: Box<SubroutineBody>,
    ) -> Self {
        Subroutine(Rc::new(SubroutineDef {
            id,
            name,
            params,
            return_type,
            body,
        }))
    }

    pub fn id(&self) -> SubroutineId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn params(&self) -> &[Param] {
        &self.0.params
    }

    pub fn arity(&self) -> usize {
        self.0.params.len()
    }

    pub fn return_type(&self) -> ValueType {
        self.0.return_type
    }

    /// Whether both handles were created by the same [`Compiler::subroutine`]
    /// call. Ids alone are only unique within one compiler.
    pub(crate) fn same_definition(&self, other: &Subroutine) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn build_body(
        &self,
        compiler: &mut Compiler,
        handles: &[Arg],
    ) -> Result<Expr, CompileError> {
        (self.0.body)(compiler, self, handles)
    }

    /// Build a call site. Arguments are checked against the parameters here.
    pub fn call(&self, args: Vec<Arg>) -> Result<Expr, CompileError> {
        self.check_args(&args)?;
        Ok(Expr::new(ExprKind::Call {
            subroutine: self.clone(),
            args,
        }))
    }

    pub(crate) fn check_args(&self, args: &[Arg]) -> Result<(), CompileError> {
        if args.len() != self.arity() {
            return Err(CompileError::type_error(format!(
                "subroutine '{}' takes {} argument(s), got {}",
                self.name(),
                self.arity(),
                args.len()
            )));
        }

        for (i, (param, arg)) in self.params().iter().zip(args).enumerate() {
            match (param.mode, arg) {
                (ParamMode::ByValue, Arg::Value(e)) => {
                    let ty = e.value_type();
                    if ty == ValueType::None {
                        return Err(CompileError::type_error(format!(
                            "argument {} at index {} of '{}' evaluates to none",
                            e,
                            i,
                            self.name()
                        )));
                    }
                    if !param.ty.accepts(ty) {
                        return Err(CompileError::type_error(format!(
                            "argument '{}' of '{}' expects {}, got {}",
                            param.name,
                            self.name(),
                            param.ty,
                            ty
                        )));
                    }
                }
                (ParamMode::ByValue, Arg::Var(v)) => {
                    return Err(CompileError::Type {
                        message: format!(
                            "argument '{}' of '{}' is passed by value, got variable {}",
                            param.name,
                            self.name(),
                            v.slot()
                        ),
                        hint: Some("pass the variable's load() instead".to_string()),
                    });
                }
                (ParamMode::ByRef, Arg::Var(v)) => {
                    if !param.ty.accepts(v.storage_type()) {
                        return Err(CompileError::type_error(format!(
                            "argument '{}' of '{}' expects a {} variable, got {} holding {}",
                            param.name,
                            self.name(),
                            param.ty,
                            v.slot(),
                            v.storage_type()
                        )));
                    }
                }
                (ParamMode::ByRef, Arg::Value(e)) => {
                    return Err(CompileError::Type {
                        message: format!(
                            "argument '{}' of '{}' is passed by reference, got expression {}",
                            param.name,
                            self.name(),
                            e
                        ),
                        hint: Some("only a scratch variable can be passed by reference".to_string()),
                    });
                }
            }
        }

        Ok(())
    }
}

impl PartialEq for Subroutine {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Subroutine {}

impl std::fmt::Debug for Subroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subroutine")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("params", &self.0.params)
            .field("return_type", &self.0.return_type)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Subroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::expr::{bytes, int, pop};

    fn sub(params: Vec<Param>, return_type: ValueType) -> Subroutine {
        Subroutine::new(
            SubroutineId(3),
            "f".to_string(),
            params,
            return_type,
            Box::new(|_, _, _| Ok(int(0))),
        )
    }

    #[test]
    fn test_identity() {
        let f = sub(vec![], ValueType::Uint64);
        let g = Subroutine::new(
            SubroutineId(3),
            "g".to_string(),
            vec![],
            ValueType::None,
            Box::new(|_, _, _| Ok(int(1))),
        );

        assert_eq!(f, g);
        assert_eq!(f.to_string(), "subroutine#3");
        assert_eq!(f.name(), "f");
    }

    #[test]
    fn test_call_type_is_return_type() {
        let f = sub(vec![Param::value("x")], ValueType::Bytes);
        let call = f.call(vec![int(1).into()]).unwrap();

        assert_eq!(call.value_type(), ValueType::Bytes);
        assert!(!call.always_returns());
        assert_eq!(call.to_string(), "(call f (int 1))");
    }

    #[test]
    fn test_arity_mismatch() {
        let f = sub(vec![Param::value("x")], ValueType::None);

        let err = f.call(vec![]).unwrap_err();
        assert!(matches!(err, CompileError::Type { .. }));
        assert!(err.to_string().contains("takes 1 argument(s), got 0"));
    }

    #[test]
    fn test_none_argument_rejected() {
        let f = sub(vec![Param::value("x")], ValueType::None);

        let err = f.call(vec![pop(int(1)).into()]).unwrap_err();
        assert!(err.to_string().contains("evaluates to none"));
    }

    #[test]
    fn test_typed_param() {
        let f = sub(vec![Param::value("x").typed(ValueType::Uint64)], ValueType::None);

        assert!(f.call(vec![int(1).into()]).is_ok());
        assert!(f.call(vec![bytes("a").into()]).is_err());
    }

    #[test]
    fn test_by_ref_requires_variable() {
        let f = sub(vec![Param::by_ref("y")], ValueType::None);

        let err = f.call(vec![int(1).into()]).unwrap_err();
        assert!(matches!(err, CompileError::Type { .. }));
        assert!(err.to_string().contains("passed by reference"));
    }

    #[test]
    fn test_typed_by_ref_param() {
        let mut compiler = Compiler::new();
        let counter = compiler.new_var(ValueType::Uint64).unwrap();
        let label = compiler.new_var(ValueType::Bytes).unwrap();
        let anything = compiler.new_var(ValueType::Any).unwrap();
        let f = sub(vec![Param::by_ref("y").typed(ValueType::Uint64)], ValueType::None);

        assert!(f.call(vec![(&counter).into()]).is_ok());
        assert!(f.call(vec![(&anything).into()]).is_ok());

        let err = f.call(vec![(&label).into()]).unwrap_err();
        assert!(matches!(err, CompileError::Type { .. }));
        assert!(err.to_string().contains("expects a uint64 variable"));
    }

    #[test]
    fn test_same_definition_is_pointer_identity() {
        let f = sub(vec![], ValueType::None);
        let g = sub(vec![], ValueType::None);

        assert_eq!(f, g);
        assert!(f.same_definition(&f.clone()));
        assert!(!f.same_definition(&g));
    }
}

//! External function library
//!
//! Black-box functions back EXTERNAL relations: each output `k` becomes a
//! relation whose residual is `f(inputs)[k] - output_k`. External methods are
//! invoked by `CALL` from procedural code and may rewrite their arguments.

use std::fmt;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::CompileError;

/// Evaluate outputs from inputs.
pub type BlackBoxFn = fn(inputs: &[f64], outputs: &mut [f64]) -> Result<(), String>;

/// Procedure over the values of its arguments, which it may update in place.
pub type ExternalMethodFn = fn(args: &mut [f64]) -> Result<(), String>;

#[derive(Clone)]
pub struct BlackBox {
    pub name: String,
    pub n_inputs: usize,
    pub n_outputs: usize,
    pub func: BlackBoxFn,
}

#[derive(Clone)]
pub struct ExternalMethod {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub n_args: Option<usize>,
    pub func: ExternalMethodFn,
}

impl fmt::Debug for BlackBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlackBox")
            .field("name", &self.name)
            .field("n_inputs", &self.n_inputs)
            .field("n_outputs", &self.n_outputs)
            .finish()
    }
}

impl fmt::Debug for ExternalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalMethod")
            .field("name", &self.name)
            .field("n_args", &self.n_args)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExternalLibrary {
    blackboxes: IndexMap<String, BlackBox>,
    methods: IndexMap<String, ExternalMethod>,
}

impl ExternalLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_blackbox(
        &mut self,
        name: &str,
        n_inputs: usize,
        n_outputs: usize,
        func: BlackBoxFn,
    ) -> Result<(), CompileError> {
        if self.blackboxes.contains_key(name) || self.methods.contains_key(name) {
            return Err(CompileError::External(format!(
                "external function '{}' is already registered",
                name
            )));
        }
        debug!("Registering black box '{}' ({} in, {} out)", name, n_inputs, n_outputs);
        self.blackboxes.insert(
            name.to_string(),
            BlackBox {
                name: name.to_string(),
                n_inputs,
                n_outputs,
                func,
            },
        );
        Ok(())
    }

    pub fn register_method(
        &mut self,
        name: &str,
        n_args: Option<usize>,
        func: ExternalMethodFn,
    ) -> Result<(), CompileError> {
        if self.blackboxes.contains_key(name) || self.methods.contains_key(name) {
            return Err(CompileError::External(format!(
                "external function '{}' is already registered",
                name
            )));
        }
        debug!("Registering external method '{}'", name);
        self.methods.insert(
            name.to_string(),
            ExternalMethod {
                name: name.to_string(),
                n_args,
                func,
            },
        );
        Ok(())
    }

    pub fn blackbox(&self, name: &str) -> Option<&BlackBox> {
        self.blackboxes.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&ExternalMethod> {
        self.methods.get(name)
    }

    /// Evaluate a black box, checking the input count.
    pub fn evaluate(&self, name: &str, inputs: &[f64]) -> Result<Vec<f64>, CompileError> {
        let bb = self
            .blackbox(name)
            .ok_or_else(|| CompileError::External(format!("no black box named '{}'", name)))?;
        if inputs.len() != bb.n_inputs {
            return Err(CompileError::External(format!(
                "'{}' takes {} input(s), given {}",
                name,
                bb.n_inputs,
                inputs.len()
            )));
        }
        let mut outputs = vec![0.0; bb.n_outputs];
        (bb.func)(inputs, &mut outputs)
            .map_err(|msg| CompileError::External(format!("'{}' failed: {}", name, msg)))?;
        Ok(outputs)
    }

    /// Run an external method over argument values.
    pub fn call(&self, name: &str, args: &mut [f64]) -> Result<(), CompileError> {
        let method = self
            .method(name)
            .ok_or_else(|| CompileError::External(format!("no external method named '{}'", name)))?;
        if let Some(n) = method.n_args {
            if n != args.len() {
                return Err(CompileError::External(format!(
                    "'{}' takes {} argument(s), given {}",
                    name,
                    n,
                    args.len()
                )));
            }
        }
        (method.func)(args)
            .map_err(|msg| CompileError::External(format!("'{}' failed: {}", name, msg)))
    }

    pub fn len(&self) -> usize {
        self.blackboxes.len() + self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.blackboxes.clear();
        self.methods.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_product(inputs: &[f64], outputs: &mut [f64]) -> Result<(), String> {
        outputs[0] = inputs.iter().sum();
        outputs[1] = inputs.iter().product();
        Ok(())
    }

    fn double_all(args: &mut [f64]) -> Result<(), String> {
        args.iter_mut().for_each(|a| *a *= 2.0);
        Ok(())
    }

    #[test]
    fn test_blackbox_evaluation() {
        let mut lib = ExternalLibrary::new();
        lib.register_blackbox("sumprod", 3, 2, sum_product).unwrap();
        assert_eq!(lib.evaluate("sumprod", &[1.0, 2.0, 3.0]).unwrap(), vec![6.0, 6.0]);
        assert!(lib.evaluate("sumprod", &[1.0]).is_err());
        assert!(lib.evaluate("nothing", &[]).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut lib = ExternalLibrary::new();
        lib.register_method("double", None, double_all).unwrap();
        assert!(matches!(
            lib.register_blackbox("double", 1, 1, sum_product),
            Err(CompileError::External(_))
        ));
        assert_eq!(lib.len(), 1);
    }

    #[test]
    fn test_call_updates_arguments() {
        let mut lib = ExternalLibrary::new();
        lib.register_method("double", Some(2), double_all).unwrap();
        let mut args = [1.5, -2.0];
        lib.call("double", &mut args).unwrap();
        assert_eq!(args, [3.0, -4.0]);
        assert!(lib.call("double", &mut [1.0]).is_err());
    }
}

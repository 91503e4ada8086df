use crate::error::{EngineError, Result};
use crate::models::{BoundParams, ParameterContext, QueryDefinition};

/// Resolve the parameters `definition` declares against `context`.
///
/// Only presence is checked: values pass through unchanged and nothing is
/// defaulted. The first absent name fails the whole bind.
pub fn bind(definition: &QueryDefinition, context: &ParameterContext) -> Result<BoundParams> {
    let mut bound = BoundParams::default();

    for name in definition.required_params() {
        let value = context
            .get(name)
            .ok_or_else(|| EngineError::missing_parameter(name.as_str(), definition.name()))?;
        bound.push(name.clone(), value.clone());
    }

    Ok(bound)
}

//! Overload resolution over [`MethodDescriptor`] candidate sets.
//!
//! Each viable candidate is scored by the fraction of its declared parameters
//! filled from an explicitly converted argument. Defaults substituted for
//! missing or nil arguments fill a slot without scoring it. The best score
//! wins under strict comparison, so equally scored candidates resolve to the
//! first declared one and resolution is deterministic for a fixed argument
//! list.

use crate::descriptor::{self, MethodDescriptor, ParamKind};
use crate::error::{LuaError, LuaResult};
use crate::types::value::Value;

/// Resolve `args` against `candidates`. Returns the winning candidate's index
/// and the fully converted argument vector to invoke it with (generic type
/// tokens included as a prefix when the candidate declares them).
pub fn resolve(candidates: &[MethodDescriptor], args: &[Value]) -> LuaResult<(usize, Vec<Value>)> {
    let mut best: Option<(usize, f64, Vec<Value>)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let Some((score, converted)) = try_candidate(candidate, args) else {
            continue;
        };
        let beats = match &best {
            Some((_, best_score, _)) => score > *best_score,
            None => true,
        };
        if beats {
            best = Some((index, score, converted));
        }
    }

    match best {
        Some((index, _, converted)) => Ok((index, converted)),
        None => Err(LuaError::Resolution(format!(
            "no overload accepts the given arguments ({})",
            describe_args(args)
        ))),
    }
}

fn try_candidate(candidate: &MethodDescriptor, args: &[Value]) -> Option<(f64, Vec<Value>)> {
    // Generic candidates consume leading type tokens before ordinary
    // resolution sees the rest.
    if args.len() < candidate.type_params {
        return None;
    }
    let (tokens, args) = args.split_at(candidate.type_params);
    if !tokens.iter().all(|t| matches!(t, Value::TypeToken(_))) {
        return None;
    }

    let params = &candidate.params;
    let variadic = params.last().is_some_and(|p| p.variadic);
    let fixed = if variadic { params.len() - 1 } else { params.len() };
    if !variadic && args.len() > params.len() {
        return None;
    }

    let mut converted: Vec<Value> = tokens.to_vec();
    let mut explicit = 0usize;

    for (i, param) in params.iter().take(fixed).enumerate() {
        match args.get(i) {
            Some(Value::Nil) | None if param.optional => {
                converted.push(param.default.clone().unwrap_or(Value::Nil));
            }
            Some(arg) => {
                converted.push(convert_arg(arg, &param.kind)?);
                explicit += 1;
            }
            None => return None,
        }
    }

    if variadic {
        let element = match &params[fixed].kind {
            ParamKind::Array(element) => element,
            // A variadic parameter always carries an array kind.
            _ => return None,
        };
        let rest = args.get(fixed..).unwrap_or(&[]);
        let mut collected = Vec::with_capacity(rest.len());
        for arg in rest {
            collected.push(convert_arg(arg, element)?);
        }
        if !collected.is_empty() {
            explicit += 1;
        }
        converted.push(Value::Array(collected));
    }

    let score = if params.is_empty() {
        if args.is_empty() { 1.0 } else { return None; }
    } else {
        explicit as f64 / params.len() as f64
    };
    Some((score, converted))
}

/// Convert one argument to a parameter kind, or reject the pairing.
fn convert_arg(arg: &Value, kind: &ParamKind) -> Option<Value> {
    match (kind, arg) {
        (ParamKind::Any, value) => Some(value.clone()),
        (ParamKind::Boolean, Value::Boolean(b)) => Some(Value::Boolean(*b)),
        (ParamKind::Integer, Value::Integer(i)) => Some(Value::Integer(*i)),
        (ParamKind::Number, Value::Number(n)) => Some(Value::Number(*n)),
        // Integral values widen to floating parameters implicitly.
        (ParamKind::Number, Value::Integer(i)) => Some(Value::Number(*i as f64)),
        (ParamKind::Str, Value::String(s)) => Some(Value::String(s.clone())),
        (ParamKind::Table, Value::Table(t)) => Some(Value::Table(t.clone())),
        (ParamKind::Function, Value::Function(f)) => Some(Value::Function(f.clone())),
        (ParamKind::Type, Value::TypeToken(t)) => Some(Value::TypeToken(t.clone())),
        (ParamKind::Array(element), Value::Array(items)) => {
            let out: Option<Vec<Value>> =
                items.iter().map(|item| convert_arg(item, element)).collect();
            Some(Value::Array(out?))
        }
        (ParamKind::Array(element), Value::Table(table)) => {
            let items = table.to_values().ok()?;
            let out: Option<Vec<Value>> =
                items.iter().map(|item| convert_arg(item, element)).collect();
            Some(Value::Array(out?))
        }
        (ParamKind::Object { type_id, .. }, Value::Object(obj)) => {
            if obj.type_id() == *type_id || descriptor::is_assignable(obj.type_id(), *type_id) {
                Some(Value::Object(obj.clone()))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn describe_args(args: &[Value]) -> String {
    if args.is_empty() {
        return "no arguments".to_owned();
    }
    args.iter()
        .map(Value::kind_name)
        .collect::<Vec<_>>()
        .join(", ")
}

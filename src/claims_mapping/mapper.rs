// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Claim mappers (C10): build claim fragments from subject/actor/request and
//! lazily-fetched data sources (§4.2). The expression-based mapper evaluates
//! a sandboxed, non-Turing-complete formula per claim using `evalexpr`, the
//! same crate and binding style the temperature-conversion formula uses.

use crate::claims::Claims;
use crate::credential::{DataSourceInput, DataSourceResult, RequestAttributes, ValidationResult};
use crate::datasource::DataSourceLookup;
use crate::error::ParsecError;
use async_trait::async_trait;
use evalexpr::{
    Context, ContextWithMutableFunctions, ContextWithMutableVariables, DefaultNumericTypes,
    Function, HashMapContext, Value as EvalValue,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Memoizes `datasource(name)` lookups within a single issuance (§4.2, §5):
/// a claim mapper that reads the same source twice sees the same bytes, and
/// a source referenced by neither chain is never fetched at all.
pub struct DataSourceMemo {
    registry: Arc<dyn DataSourceLookup>,
    cache: Mutex<HashMap<String, Option<DataSourceResult>>>,
}

impl DataSourceMemo {
    pub fn new(registry: Arc<dyn DataSourceLookup>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get<'a>(
        &self,
        name: &str,
        input: DataSourceInput<'a>,
    ) -> Option<DataSourceResult> {
        if let Some(cached) = self.cache.lock().expect("datasource memo poisoned").get(name) {
            return cached.clone();
        }
        let result = self.registry.fetch_named(name, input).await;
        self.cache
            .lock()
            .expect("datasource memo poisoned")
            .insert(name.to_string(), result.clone());
        result
    }
}

/// Everything a [`ClaimMapper`] may read from (§4.2).
pub struct MapperInput<'a> {
    pub subject: &'a ValidationResult,
    pub actor: Option<&'a ValidationResult>,
    pub request_attributes: &'a RequestAttributes,
    pub datasource_memo: &'a DataSourceMemo,
}

impl<'a> MapperInput<'a> {
    fn datasource_input(&self) -> DataSourceInput<'a> {
        DataSourceInput {
            subject: self.subject,
            actor: self.actor,
            request_attributes: self.request_attributes,
        }
    }
}

/// Builds a fragment of claims from one [`MapperInput`] (C10, §4.2). Mappers
/// in a chain run sequentially and are merged last-writer-wins.
#[async_trait]
pub trait ClaimMapper: Send + Sync {
    async fn map(&self, input: &MapperInput<'_>) -> Result<Claims, ParsecError>;
}

/// One `claim_name = expression` pair evaluated with `evalexpr`.
#[derive(Debug, Clone)]
pub struct ClaimExpression {
    pub claim_name: String,
    pub expression: String,
    /// Data source names textually referenced by `expression`, extracted at
    /// construction time so only sources actually read are ever fetched.
    referenced_sources: Vec<String>,
}

impl ClaimExpression {
    pub fn new(claim_name: impl Into<String>, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        let referenced_sources = extract_datasource_names(&expression);
        Self {
            claim_name: claim_name.into(),
            expression,
            referenced_sources,
        }
    }
}

/// Scans for `datasource("name")` call sites without a full parser — the
/// expression language is sandboxed and this is purely an optimization to
/// avoid fetching sources an expression never reads.
fn extract_datasource_names(expression: &str) -> Vec<String> {
    const NEEDLE: &str = "datasource(";
    let mut names = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = expression[search_from..].find(NEEDLE) {
        let start = search_from + rel + NEEDLE.len();
        let rest = &expression[start..];
        if let Some(quote_start) = rest.find(['"', '\'']) {
            let quote_char = rest.as_bytes()[quote_start] as char;
            let after_quote = &rest[quote_start + 1..];
            if let Some(quote_end) = after_quote.find(quote_char) {
                names.push(after_quote[..quote_end].to_string());
            }
        }
        search_from = start;
    }
    names
}

fn json_to_eval_value(value: &JsonValue) -> EvalValue {
    match value {
        JsonValue::Null => EvalValue::Empty,
        JsonValue::Bool(b) => EvalValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalValue::Int(i)
            } else {
                EvalValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        JsonValue::String(s) => EvalValue::String(s.clone()),
        JsonValue::Array(items) => EvalValue::Tuple(items.iter().map(json_to_eval_value).collect()),
        // evalexpr has no object/map value; nested objects round-trip as JSON text.
        JsonValue::Object(_) => EvalValue::String(value.to_string()),
    }
}

fn eval_value_to_json(value: EvalValue) -> JsonValue {
    match value {
        EvalValue::String(s) => JsonValue::String(s),
        EvalValue::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        EvalValue::Int(i) => JsonValue::Number(i.into()),
        EvalValue::Boolean(b) => JsonValue::Bool(b),
        EvalValue::Tuple(items) => JsonValue::Array(items.into_iter().map(eval_value_to_json).collect()),
        EvalValue::Empty => JsonValue::Null,
    }
}

fn claim_lookup(claims: &Claims, key: &str) -> EvalValue {
    claims
        .get(key)
        .map(json_to_eval_value)
        .unwrap_or(EvalValue::Empty)
}

/// Expression-based [`ClaimMapper`] evaluating one `evalexpr` formula per
/// configured claim. Bindings exposed to every expression: `subject_sub`,
/// `subject_iss`, `subject_trust_domain`, `subject_scope`, `actor_sub`
/// (empty when anonymous), `request_method`, `request_path`, `request_ip`,
/// plus the functions `subject_claim(key)`, `actor_claim(key)`,
/// `request_header(key)`, and `datasource(name)` (§4.2).
pub struct ExpressionClaimMapper {
    expressions: Vec<ClaimExpression>,
}

impl ExpressionClaimMapper {
    pub fn new(expressions: Vec<ClaimExpression>) -> Self {
        Self { expressions }
    }
}

#[async_trait]
impl ClaimMapper for ExpressionClaimMapper {
    async fn map(&self, input: &MapperInput<'_>) -> Result<Claims, ParsecError> {
        let mut resolved_sources: HashMap<String, Option<DataSourceResult>> = HashMap::new();
        for expression in &self.expressions {
            for name in &expression.referenced_sources {
                if !resolved_sources.contains_key(name) {
                    let value = input
                        .datasource_memo
                        .get(name, input.datasource_input())
                        .await;
                    resolved_sources.insert(name.clone(), value);
                }
            }
        }

        let mut claims = Claims::new();
        for expression in &self.expressions {
            let context = build_context(input, &resolved_sources)?;
            let result = evalexpr::eval_with_context(&expression.expression, &context)
                .map_err(|e| {
                    ParsecError::Configuration(format!(
                        "claim expression for '{}' failed: {e}",
                        expression.claim_name
                    ))
                })?;
            claims.insert(expression.claim_name.clone(), eval_value_to_json(result));
        }
        Ok(claims)
    }
}

fn build_context(
    input: &MapperInput<'_>,
    resolved_sources: &HashMap<String, Option<DataSourceResult>>,
) -> Result<HashMapContext<DefaultNumericTypes>, ParsecError> {
    let mut context = HashMapContext::<DefaultNumericTypes>::new();
    context
        .set_builtin_functions_disabled(false)
        .map_err(|e| ParsecError::Internal(format!("evalexpr context setup failed: {e}")))?;

    let set = |ctx: &mut HashMapContext<DefaultNumericTypes>, name: &str, value: EvalValue| {
        ctx.set_value(name.into(), value)
    };

    set(&mut context, "subject_sub", EvalValue::String(input.subject.subject.clone()))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;
    set(&mut context, "subject_iss", EvalValue::String(input.subject.issuer.clone()))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;
    set(
        &mut context,
        "subject_trust_domain",
        EvalValue::String(input.subject.trust_domain.clone()),
    )
    .map_err(|e| ParsecError::Internal(e.to_string()))?;
    set(&mut context, "subject_scope", EvalValue::String(input.subject.scope.clone()))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    let actor_sub = input
        .actor
        .map(|actor| actor.subject.clone())
        .unwrap_or_default();
    set(&mut context, "actor_sub", EvalValue::String(actor_sub))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    set(&mut context, "request_method", EvalValue::String(input.request_attributes.method.clone()))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;
    set(&mut context, "request_path", EvalValue::String(input.request_attributes.path.clone()))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;
    set(&mut context, "request_ip", EvalValue::String(input.request_attributes.ip_address.clone()))
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    let subject_claims = input.subject.claims.copy();
    context
        .set_function(
            "subject_claim".into(),
            Function::new(move |argument| {
                let key = argument.as_string()?;
                Ok(claim_lookup(&subject_claims, &key))
            }),
        )
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    let actor_claims = input
        .actor
        .map(|actor| actor.claims.copy())
        .unwrap_or_else(Claims::new);
    context
        .set_function(
            "actor_claim".into(),
            Function::new(move |argument| {
                let key = argument.as_string()?;
                Ok(claim_lookup(&actor_claims, &key))
            }),
        )
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    let headers = input.request_attributes.headers.clone();
    context
        .set_function(
            "request_header".into(),
            Function::new(move |argument| {
                let key = argument.as_string()?;
                Ok(headers
                    .get(&key)
                    .map(|v| EvalValue::String(v.clone()))
                    .unwrap_or(EvalValue::Empty))
            }),
        )
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    let sources = resolved_sources.clone();
    context
        .set_function(
            "datasource".into(),
            Function::new(move |argument| {
                let name = argument.as_string()?;
                let value = match sources.get(&name) {
                    Some(Some(entry)) => serde_json::from_slice::<JsonValue>(&entry.data)
                        .map(|v| json_to_eval_value(&v))
                        .unwrap_or(EvalValue::Empty),
                    _ => EvalValue::Empty,
                };
                Ok(value)
            }),
        )
        .map_err(|e| ParsecError::Internal(e.to_string()))?;

    Ok(context)
}

//! Custom tracing layers
//!
//! [`UserContextLayer`] attaches the active [`UserContextGuard`] data to every
//! new span. [`ContextJsonFormat`] writes one JSON object per event and puts
//! that data on the line as `user_id` / `session_id`.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber, span};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, JsonFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormattedFields, MakeWriter};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::config::EventFields;
use crate::context::{UserContextData, UserContextGuard};

/// Layer that stores the acting user on each span created inside a guard's scope
#[derive(Debug, Default)]
pub struct UserContextLayer;

impl UserContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct UserContextExtension {
    pub data: UserContextData,
}

impl<S> Layer<S> for UserContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(user_ctx) = UserContextGuard::current()
        {
            span.extensions_mut()
                .insert(UserContextExtension { data: user_ctx });
        }
    }
}

/// Event formatter producing one JSON object per line
///
/// The acting user comes from the innermost enclosing span that carries a
/// [`UserContextExtension`], so a client's events stay attributed after its
/// future moves between tasks. Without such a span the thread's current guard
/// is used.
#[derive(Debug, Clone, Copy)]
pub struct ContextJsonFormat {
    fields: EventFields,
}

impl ContextJsonFormat {
    pub fn new(fields: EventFields) -> Self {
        Self { fields }
    }
}

impl<S, N> FormatEvent<S, N> for ContextJsonFormat
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut line = Map::new();
        line.insert(
            "timestamp".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .into(),
        );
        line.insert("level".into(), meta.level().as_str().into());
        line.insert("target".into(), meta.target().into());

        if self.fields.user_context {
            let from_span = ctx.event_scope().and_then(|mut scope| {
                scope.find_map(|span| {
                    span.extensions()
                        .get::<UserContextExtension>()
                        .map(|ext| ext.data.clone())
                })
            });
            if let Some(user) = from_span.or_else(UserContextGuard::current) {
                line.insert("user_id".into(), user.user_id.into());
                line.insert("session_id".into(), user.session_id.to_string().into());
            }
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        line.insert("fields".into(), Value::Object(visitor.0));

        if self.fields.spans
            && let Some(scope) = ctx.event_scope()
        {
            let spans: Vec<Value> = scope
                .from_root()
                .map(|span| {
                    let mut entry = Map::new();
                    entry.insert("name".into(), span.name().into());
                    // Span fields were already rendered as a JSON object by `JsonFields`
                    if let Some(rendered) = span.extensions().get::<FormattedFields<N>>()
                        && let Ok(Value::Object(fields)) = serde_json::from_str(&rendered.fields)
                    {
                        entry.extend(fields);
                    }
                    Value::Object(entry)
                })
                .collect();
            line.insert("spans".into(), Value::Array(spans));
        }

        if self.fields.location {
            if let Some(file) = meta.file() {
                line.insert("file".into(), file.into());
            }
            if let Some(number) = meta.line() {
                line.insert("line".into(), number.into());
            }
        }
        if self.fields.thread
            && let Some(name) = std::thread::current().name()
        {
            line.insert("thread".into(), name.into());
        }

        let text = serde_json::to_string(&line).map_err(|_| fmt::Error)?;
        writeln!(writer, "{text}")
    }
}

#[derive(Default)]
struct FieldVisitor(Map<String, Value>);

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string().into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}").into());
    }
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(
    writer: W,
    fields: EventFields,
) -> tracing_subscriber::fmt::Layer<S, JsonFields, ContextJsonFormat, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .fmt_fields(JsonFields::new())
        .event_format(ContextJsonFormat::new(fields))
        .with_writer(writer)
}

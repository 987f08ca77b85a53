use async_trait::async_trait;
use serde_json::Value;
use turncore::{NodeContext, NodeError, NodeHandler, SharedContext};
use turnruntime::HandlerMetadata;

pub const TRANSFORM_ECHO: &str = "transform.echo";
pub const TRANSFORM_TEMPLATE: &str = "transform.template";

/// Outputs its `value` parameter, or its own node id when there is none
pub struct EchoNode;

#[async_trait]
impl NodeHandler for EchoNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError> {
        let value = ctx
            .parameters
            .get("value")
            .cloned()
            .unwrap_or_else(|| Value::String(ctx.node_id.clone()));
        Ok(Some(value))
    }
}

/// Renders the `template` parameter, replacing `{{ key }}` with entries of
/// the shared context.
///
/// String entries are inserted as-is, other values as JSON. Unknown keys
/// render as an empty string.
pub struct TemplateNode;

#[async_trait]
impl NodeHandler for TemplateNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError> {
        let template = ctx
            .require_parameter("template")?
            .as_str()
            .ok_or_else(|| NodeError::InvalidParameter {
                name: "template".to_string(),
                reason: "expected a string".to_string(),
            })?;

        let rendered = render(template, &ctx.shared).await?;
        Ok(Some(Value::String(rendered)))
    }
}

async fn render(template: &str, shared: &SharedContext) -> Result<String, NodeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| NodeError::InvalidParameter {
            name: "template".to_string(),
            reason: "unterminated placeholder".to_string(),
        })?;

        match shared.get(after[..close].trim()).await {
            Some(Value::String(s)) => out.push_str(&s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

pub(crate) fn echo_metadata() -> HandlerMetadata {
    HandlerMetadata {
        description: "Outputs the value parameter (or the node id)".to_string(),
        category: "transform".to_string(),
    }
}

pub(crate) fn template_metadata() -> HandlerMetadata {
    HandlerMetadata {
        description: "Renders {{ key }} placeholders from the shared context".to_string(),
        category: "transform".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn renders_strings_and_json() {
        let shared = SharedContext::default();
        shared.set("__output_a", "hello").await;
        shared.set_round(2).await;

        let rendered = render("{{__output_a}} at round {{ __round }}{{missing}}!", &shared)
            .await
            .unwrap();

        assert_eq!(rendered, "hello at round 2!");
    }

    #[tokio::test]
    async fn rejects_unterminated_placeholder() {
        let err = render("oops {{ open", &SharedContext::default()).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn echo_defaults_to_node_id() {
        let ctx = NodeContext::new("n7", SharedContext::default());
        assert_eq!(EchoNode.execute(ctx).await.unwrap(), Some(json!("n7")));
    }
}

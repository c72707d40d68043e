//! A small application served by `lightwire serve`.
//!
//! A button counts its clicks, a text field takes input, and a label
//! echoes the field once typing pauses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::Mutex;

use crate::protocol::{ComponentId, EventKind, InputEvent, PropertyValue, ValueShape};
use crate::scheduler::TaskId;
use crate::server::{Application, UiContext};
use crate::tree::{ClassRegistry, ClassSpec};

pub const ECHO_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Clone, Copy)]
pub struct DemoApp;

impl Application for DemoApp {
    fn register_classes(&self, registry: &mut ClassRegistry) {
        registry.register(
            ClassSpec::new("Button")
                .property("label", ValueShape::String)
                .property_with_default("enabled", PropertyValue::Bool(true)),
        );
        registry.register(
            ClassSpec::new("TextField")
                .property("text", ValueShape::String)
                .property("placeholder", ValueShape::String),
        );
        registry.register(ClassSpec::new("Label").property("text", ValueShape::String));
    }

    fn start(&self, ctx: &mut UiContext, root: ComponentId) -> anyhow::Result<()> {
        ctx.set(root, "title", PropertyValue::text("lightwire demo"))?;
        ctx.on(root, EventKind::Resize, on_resize)?;

        let button = ctx.add(root, "Button")?;
        ctx.set(button, "label", PropertyValue::text("Click me"))?;
        let clicks = Arc::new(AtomicU64::new(0));
        ctx.on(button, EventKind::Select, move |ctx, _| {
            let n = clicks.fetch_add(1, Ordering::SeqCst) + 1;
            let plural = if n == 1 { "" } else { "s" };
            ctx.set(button, "label", PropertyValue::text(format!("Clicked {n} time{plural}")))?;
            Ok(())
        })?;

        let field = ctx.add(root, "TextField")?;
        ctx.set(field, "placeholder", PropertyValue::text("Type something"))?;
        let echo = ctx.add(root, "Label")?;

        let pending_echo: Arc<Mutex<Option<TaskId>>> = Arc::new(Mutex::new(None));
        ctx.on(field, EventKind::Text, move |ctx, event| {
            let text = event.content.clone().unwrap_or_default();
            ctx.set(field, "text", PropertyValue::text(text.clone()))?;

            if let Some(previous) = pending_echo.lock().take() {
                ctx.cancel(previous);
            }
            let slot = pending_echo.clone();
            let id = ctx.defer("echo", ECHO_DELAY, move |ctx| {
                slot.lock().take();
                ctx.set(echo, "text", PropertyValue::text(format!("You typed: {text}")))?;
                Ok(())
            });
            *pending_echo.lock() = Some(id);
            Ok(())
        })?;

        Ok(())
    }
}

/// RESIZE carries `width,height` as its content.
fn on_resize(ctx: &mut UiContext, event: &InputEvent) -> anyhow::Result<()> {
    let content = event.content.as_deref().unwrap_or_default();
    let (width, height) = content
        .split_once(',')
        .context("resize content must be 'width,height'")?;
    let size = PropertyValue::Size {
        width: width.trim().parse().context("resize width")?,
        height: height.trim().parse().context("resize height")?,
    };
    ctx.set(event.target, "size", size)?;
    Ok(())
}

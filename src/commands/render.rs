//! `homestack render` - print the resolved cluster objects

use anyhow::{Context as AnyhowContext, Result};

use crate::Context;
use crate::engine::display_form;

pub fn run(ctx: &Context, target: Option<&str>, show_secrets: bool) -> Result<()> {
    let planned = super::plan(ctx, target)?;

    let objects: Vec<_> = planned
        .selected()
        .into_iter()
        .flat_map(|resource| resource.objects())
        .map(|object| {
            if show_secrets {
                object.clone()
            } else {
                display_form(object)
            }
        })
        .collect();

    log::debug!("Rendering {} objects", objects.len());
    let json = serde_json::to_string_pretty(&objects).context("Failed to serialize objects")?;
    println!("{json}");
    Ok(())
}

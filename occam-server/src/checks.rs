//! The compiled check module. Replace the body of `run` with your own
//! rules; the primitives available are `match_eq`, `match_regex`, and the
//! rate and emit methods on [`CheckContext`].

use std::time::Duration;

use async_trait::async_trait;

use occam_core::prelude::*;

#[derive(Debug, Default)]
pub struct StandardChecks;

#[async_trait]
impl Ruleset for StandardChecks {
    async fn run(&self, ctx: &CheckContext, msg: &Message) -> Result<()> {
        if ctx.rate(5, Duration::from_secs(30)).await? {
            ctx.emit_console(msg);
        }

        // One window per value of the key field.
        if ctx
            .rate_keyed(msg, "somekeyfield", 5, Duration::from_secs(30))
            .await?
        {
            ctx.emit_console(msg);
        }

        if match_eq(msg, "somefield", "somevalue") {
            ctx.emit_console(msg);
        }

        if match_regex(msg, "somefield", ".*")? {
            ctx.emit_console(msg);
        }

        Ok(())
    }
}

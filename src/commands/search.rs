//! `search` and `resolve` command handlers.

use anyhow::{Result, bail};
use gamegrab_core::Candidate;

use super::context::AppContext;
use crate::cli::{ResolveArgs, SearchArgs};

pub async fn run_search_command(ctx: &AppContext, args: &SearchArgs) -> Result<()> {
    let query = args.query_text();
    let candidates = ctx.discovery()?.discover(&query).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No releases found for \"{query}\".");
        return Ok(());
    }
    for candidate in &candidates {
        println!("{}", render_candidate_row(candidate));
    }
    Ok(())
}

fn render_candidate_row(candidate: &Candidate) -> String {
    format!(
        "[{source:<7}] {name}  ({size})\n          {url}",
        source = candidate.source.id(),
        name = candidate.name,
        size = candidate.size,
        url = candidate.detail_url,
    )
}

pub async fn run_resolve_command(ctx: &AppContext, args: &ResolveArgs) -> Result<()> {
    let discovery = ctx.discovery()?;
    match discovery
        .resolve_locator(&args.source, &args.detail_url)
        .await
    {
        Some(locator) => {
            println!("{locator}");
            Ok(())
        }
        None => bail!(
            "No magnet locator found on '{}' for source '{}'\n  Suggestion: Check the source label (fitgirl, dodi, 1337x) and open the page in a browser",
            args.detail_url,
            args.source
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamegrab_core::Source;

    #[test]
    fn test_render_candidate_row() {
        let candidate = Candidate::new(
            "fitgirl-0",
            "Example Game",
            "12.4 GB",
            Source::FitGirl,
            "https://fitgirl-repacks.site/example-game/",
        );
        let row = render_candidate_row(&candidate);
        assert!(row.starts_with("[fitgirl] Example Game  (12.4 GB)"));
        assert!(row.contains("https://fitgirl-repacks.site/example-game/"));
    }
}

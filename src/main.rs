mod args;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::Args;
use storyreel::pexels::PexelsClient;
use storyreel::stories::{JsonFileStories, StorySource, SupabaseStories};
use storyreel::{Assembler, BackgroundSource, Settings, StoryRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting story video pipeline");

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &args.results_dir {
        settings.pipeline.results_dir = dir.clone();
    }
    if let Some(model) = &args.piper_model {
        settings.pipeline.voice = model.clone();
    }
    if let Some(fps) = args.fps {
        settings.pipeline.fps = fps;
    }
    if args.subtitles {
        settings.pipeline.subtitles_sidecar = true;
    }

    let story = fetch_story(&args).await?;
    info!("Using story '{}': {}", story.slug, story.title);

    let background = pick_background(&args, &story).await;
    info!("Background: {:?}", background);

    let Settings { pipeline, style } = settings;
    let max_comments = args.max_comments;
    let out = tokio::task::spawn_blocking(move || {
        Assembler::new(pipeline).assemble(&story, background, &style, max_comments)
    })
    .await
    .context("assembly task panicked")??;

    info!("Process complete: {}", out.display());
    Ok(())
}

async fn fetch_story(args: &Args) -> anyhow::Result<StoryRecord> {
    let slug = args.slug.as_deref();
    if let Some(path) = &args.story_file {
        return JsonFileStories::new(path).fetch(slug).await;
    }
    let (Some(url), Some(key)) = (&args.supabase_url, &args.supabase_key) else {
        bail!("no story source: pass --story-file or set SUPABASE_URL and SUPABASE_KEY");
    };
    SupabaseStories::new(url, key, &args.used_slugs)
        .fetch(slug)
        .await
}

// Footage problems never stop the run; the assembler falls back to a solid background.
async fn pick_background(args: &Args, story: &StoryRecord) -> BackgroundSource {
    if let Some(path) = &args.background {
        return BackgroundSource::File(path.clone());
    }
    if args.no_pexels {
        return BackgroundSource::Unavailable;
    }
    let Some(key) = &args.pexels_api_key else {
        warn!("PEXELS_API_KEY not set; skipping stock footage");
        return BackgroundSource::Unavailable;
    };
    let client = match PexelsClient::new(key, &args.footage_cache) {
        Ok(client) => client,
        Err(e) => {
            warn!("{}", e);
            return BackgroundSource::Unavailable;
        }
    };
    match client.select_for_story(story).await {
        Ok(path) => path.into(),
        Err(e) => {
            warn!("Stock footage unavailable: {:#}", e);
            BackgroundSource::Unavailable
        }
    }
}

use std::path::PathBuf;

use clap::Parser;

/// Turn a story into a narrated vertical video.
#[derive(Parser, Debug)]
#[clap(name = "storyreel", version)]
pub struct Args {
    /// Story to render; the newest unused published story when omitted.
    #[clap(long)]
    pub slug: Option<String>,

    /// Read stories from this JSON file instead of Supabase.
    #[clap(long)]
    pub story_file: Option<PathBuf>,

    /// Background clip; skips the stock footage search.
    #[clap(long)]
    pub background: Option<PathBuf>,

    /// Don't search Pexels; use --background or a solid color.
    #[clap(long)]
    pub no_pexels: bool,

    /// JSON settings file (pipeline and style).
    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(long)]
    pub results_dir: Option<PathBuf>,

    /// Piper voice model (.onnx).
    #[clap(long)]
    pub piper_model: Option<String>,

    #[clap(long, default_value_t = 3)]
    pub max_comments: usize,

    #[clap(long)]
    pub fps: Option<u32>,

    /// Also write an .srt next to the video.
    #[clap(long)]
    pub subtitles: bool,

    #[clap(long, env = "SUPABASE_URL", hide_env_values = true)]
    pub supabase_url: Option<String>,

    #[clap(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    #[clap(long, env = "PEXELS_API_KEY", hide_env_values = true)]
    pub pexels_api_key: Option<String>,

    /// Remembers which stories were already rendered.
    #[clap(long, default_value = "./config/used_slugs.json")]
    pub used_slugs: PathBuf,

    #[clap(long, default_value = "assets/backgrounds/pexels")]
    pub footage_cache: PathBuf,
}

use clap::{ArgGroup, Parser};

use crate::types::{LogLevel, Mode};

#[derive(Parser, Debug)]
#[command(
    name = "sflypd-rs",
    about = "Download, verify and repair a Shutterfly (ThisLife) photo library"
)]
#[command(group(
    ArgGroup::new("mode")
        .args(["count_only", "compare", "album", "fix_incomplete", "dedupe"])
        .multiple(false)
))]
pub struct Cli {
    /// Shutterfly access token or `_thislife_session=...` cookie (prompted if missing).
    /// WARNING: passing via --token is visible in process listings.
    /// Prefer the SHUTTERFLY_TOKEN environment variable instead.
    #[arg(short = 't', long, env = "SHUTTERFLY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// ThisLife user id (defaults to the token's sfly_uid claim)
    #[arg(long, env = "LIFE_UID")]
    pub life_uid: Option<String>,

    /// Local directory for downloads
    #[arg(short = 'o', long, default_value = "shutterfly_photos")]
    pub output_dir: String,

    /// Delay between albums in seconds
    #[arg(short = 'r', long, default_value_t = 0.1)]
    pub rate_limit: f64,

    /// Concurrent item downloads per album
    #[arg(short = 'p', long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub parallel_workers: u16,

    /// Max retries per request on transient failures (0 disables)
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 1)]
    pub retry_delay: u64,

    /// Connect and API-call timeout in seconds (item downloads are not capped)
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Album names to skip when repairing (merged with ignore_albums.txt)
    #[arg(long, num_args = 1..)]
    pub ignore_albums: Vec<String>,

    /// Only count albums and photos without downloading
    #[arg(short = 'c', long)]
    pub count_only: bool,

    /// Compare local downloads with server data
    #[arg(long)]
    pub compare: bool,

    /// Download a single album by name
    #[arg(short = 'a', long)]
    pub album: Option<String>,

    /// Match --album against the sanitized directory name
    #[arg(long, requires = "album")]
    pub sanitized_name: bool,

    /// Re-download every album with missing photos
    #[arg(long)]
    pub fix_incomplete: bool,

    /// Remove exact duplicate photos (different content is kept)
    #[arg(long)]
    pub dedupe: bool,

    /// With --dedupe, check every album even if its file count looks right
    #[arg(long, requires = "dedupe")]
    pub thorough: bool,

    /// Resume downloading from this album name
    #[arg(long, conflicts_with = "mode")]
    pub resume_from: Option<String>,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.dedupe {
            Mode::Dedupe {
                thorough: self.thorough,
            }
        } else if self.count_only {
            Mode::CountOnly
        } else if self.compare {
            Mode::Compare
        } else if self.fix_incomplete {
            Mode::FixIncomplete
        } else if let Some(name) = &self.album {
            Mode::Album {
                name: name.clone(),
                sanitized: self.sanitized_name,
            }
        } else {
            Mode::DownloadAll {
                resume_from: self.resume_from.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sflypd-rs").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_download_all() {
        let cli = parse(&["--token", "abc"]).unwrap();
        assert_eq!(cli.mode(), Mode::DownloadAll { resume_from: None });
        assert_eq!(cli.parallel_workers, 1);
        assert_eq!(cli.output_dir, "shutterfly_photos");
        assert!((cli.rate_limit - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_modes() {
        assert_eq!(parse(&["--count-only"]).unwrap().mode(), Mode::CountOnly);
        assert_eq!(parse(&["--compare"]).unwrap().mode(), Mode::Compare);
        assert_eq!(parse(&["--fix-incomplete"]).unwrap().mode(), Mode::FixIncomplete);
        assert_eq!(
            parse(&["--dedupe", "--thorough"]).unwrap().mode(),
            Mode::Dedupe { thorough: true }
        );
        assert_eq!(
            parse(&["-a", "Trip", "--sanitized-name"]).unwrap().mode(),
            Mode::Album {
                name: "Trip".into(),
                sanitized: true
            }
        );
        assert_eq!(
            parse(&["--resume-from", "Trip"]).unwrap().mode(),
            Mode::DownloadAll {
                resume_from: Some("Trip".into())
            }
        );
    }

    #[test]
    fn test_modes_are_exclusive() {
        assert!(parse(&["--compare", "--dedupe"]).is_err());
        assert!(parse(&["--count-only", "--resume-from", "Trip"]).is_err());
        assert!(parse(&["--thorough"]).is_err());
        assert!(parse(&["--sanitized-name"]).is_err());
    }

    #[test]
    fn test_ignore_albums_takes_many() {
        let cli = parse(&["--ignore-albums", "A", "B C", "--compare"]).unwrap();
        assert_eq!(cli.ignore_albums, vec!["A", "B C"]);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(parse(&["-p", "0"]).is_err());
    }
}

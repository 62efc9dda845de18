use atty::Stream;
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use epm_core::{Config, StoreSession};

mod commands;
mod style;

use commands::{Outcome, Status};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = EpmCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let config = Config::from_env().map_err(|err| eyre!("{err}"))?;
    let outcome = dispatch(&config, &cli.command).map_err(|err| eyre!("{err:?}"))?;
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("epm={level},epm_cli={level},epm_core={level},epm_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn dispatch(config: &Config, command: &Command) -> anyhow::Result<Outcome> {
    let session = StoreSession::new(config)?;
    match command {
        Command::List(args) => {
            commands::list(&session, args.needle.as_deref(), args.all, args.archived)
        }
        Command::Search(args) => commands::search(config, &args.text, args.year),
        Command::Add(args) => {
            commands::add(&session, config, &args.title_id, args.comment.as_deref())
        }
        Command::Seen(args) => commands::seen(&session, &args.needle, &args.episodes, args.aired),
        Command::Unseen(args) => commands::unseen(&session, &args.needle, &args.episodes),
        Command::Archive(args) => commands::archive(&session, &args.needle),
        Command::Restore(args) => commands::restore(&session, &args.needle),
        Command::Rate(args) => {
            commands::rate(&session, &args.needle, args.rating, args.comment.as_deref())
        }
        Command::Refresh(args) => {
            commands::refresh(&session, config, args.needle.as_deref(), args.force)
        }
        Command::Rollback => commands::rollback(&session),
        Command::Backups => commands::backups(&session),
    }
}

fn emit_output(cli: &EpmCli, outcome: &Outcome) -> Result<i32> {
    let code = match outcome.status {
        Status::Ok => 0,
        Status::UserError => 1,
        Status::Failure => 2,
    };

    if cli.json {
        let payload = serde_json::json!({
            "status": outcome.status.as_str(),
            "message": outcome.message,
            "details": outcome.details,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !cli.quiet {
        let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
        println!("{}", style.status(outcome.status, &outcome.message));
        for line in &outcome.lines {
            println!("{line}");
        }
    }

    Ok(code)
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Track watched TV episodes in a local compressed store",
    after_help = "Examples:\n  epm search \"the wire\"\n  epm add 1438\n  epm seen 3\n  epm --json list"
)]
struct EpmCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)"
    )]
    quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q")]
    trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes")]
    json: bool,
    #[arg(long, help = "Disable colored human output")]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "List tracked series with index, state and the next unseen episode.",
        after_help = "Examples:\n  epm list\n  epm list wire\n  epm list --archived\n"
    )]
    List(ListArgs),
    #[command(
        about = "Search the catalog for series to add.",
        after_help = "Examples:\n  epm search \"the wire\"\n  epm search fargo --year 2014\n"
    )]
    Search(SearchArgs),
    #[command(
        about = "Start tracking a series by catalog id or IMDb id.",
        after_help = "Examples:\n  epm add 1438\n  epm add tt0306414 --comment \"rewatch\"\n"
    )]
    Add(AddArgs),
    #[command(
        about = "Mark episodes seen (defaults to the next unseen one).",
        after_help = "Examples:\n  epm seen 3\n  epm seen wire 1:4 1:5\n  epm seen 3 --aired\n"
    )]
    Seen(SeenArgs),
    #[command(
        about = "Unmark episodes (defaults to the most recently seen one).",
        after_help = "Example:\n  epm unseen wire 1:5\n"
    )]
    Unseen(UnseenArgs),
    #[command(about = "Archive a series; it drops out of the default list")]
    Archive(NeedleArgs),
    #[command(about = "Bring an archived series back")]
    Restore(NeedleArgs),
    #[command(
        about = "Rate a series 0-10 with an optional comment.",
        after_help = "Example:\n  epm rate wire 10 --comment \"all the pieces matter\"\n"
    )]
    Rate(RateArgs),
    #[command(
        about = "Fetch new episodes for series that are due a check.",
        after_help = "Examples:\n  epm refresh\n  epm refresh wire --force\n"
    )]
    Refresh(RefreshArgs),
    #[command(about = "Restore the store from the most recent backup")]
    Rollback,
    #[command(about = "List existing backup snapshots")]
    Backups,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(value_name = "TITLE", help = "Title substring filter")]
    needle: Option<String>,
    #[arg(long, help = "Include every state, archived too", conflicts_with = "archived")]
    all: bool,
    #[arg(long, help = "Only archived and abandoned series")]
    archived: bool,
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(value_name = "TEXT")]
    text: String,
    #[arg(long, help = "Restrict to a first-aired year")]
    year: Option<i32>,
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(value_name = "ID", help = "Catalog id or IMDb tt-id")]
    title_id: String,
    #[arg(long, help = "Note stored alongside the series")]
    comment: Option<String>,
}

#[derive(Args, Debug)]
struct SeenArgs {
    #[arg(value_name = "SERIES", help = "List index, IMDb id or title substring")]
    needle: String,
    #[arg(value_name = "SEASON:EPISODE")]
    episodes: Vec<String>,
    #[arg(long, help = "Mark everything that has already aired")]
    aired: bool,
}

#[derive(Args, Debug)]
struct UnseenArgs {
    #[arg(value_name = "SERIES", help = "List index, IMDb id or title substring")]
    needle: String,
    #[arg(value_name = "SEASON:EPISODE")]
    episodes: Vec<String>,
}

#[derive(Args, Debug)]
struct NeedleArgs {
    #[arg(value_name = "SERIES", help = "List index, IMDb id or title substring")]
    needle: String,
}

#[derive(Args, Debug)]
struct RateArgs {
    #[arg(value_name = "SERIES", help = "List index, IMDb id or title substring")]
    needle: String,
    #[arg(value_name = "RATING", value_parser = clap::value_parser!(u8).range(0..=10))]
    rating: u8,
    #[arg(long)]
    comment: Option<String>,
}

#[derive(Args, Debug)]
struct RefreshArgs {
    #[arg(value_name = "SERIES", help = "Limit to one series")]
    needle: Option<String>,
    #[arg(long, help = "Refresh even when not due a check")]
    force: bool,
}

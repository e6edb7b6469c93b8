//! Wayback Rules CLI
//!
//! Offline tooling over a JSON rules file: canonicalize URLs, resolve the
//! rules that apply to a capture, search and browse the rule set, and
//! validate rule documents.

mod logger;
mod rules;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;
use time::OffsetDateTime;

use wr_compiler::{error, optimize_rules, parse_rules, rules_summary, success, validate_rules};
use wr_core::{
    disambiguate, search_rules, FilterFlags, ResolveContext, Resolver, RuleFilter, RuleOrder,
    RuleStore, Surt,
};

use crate::rules::{load_store, parse_datetime, read_rules_file};

#[derive(Parser)]
#[command(name = "wr-cli")]
#[command(about = "Wayback playback rules engine tools")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize a URL or SURT
    Surt {
        /// URL or literal SURT
        input: String,

        /// Also print every ancestor, most specific first
        #[arg(short, long)]
        ancestors: bool,
    },

    /// List the rules that apply to a URL or SURT
    Resolve {
        /// Rules file (JSON)
        #[arg(short, long)]
        rules: PathBuf,

        /// URL or literal SURT to resolve
        target: String,

        /// Request protocol (defaults to the target's scheme)
        #[arg(long)]
        protocol: Option<String>,

        /// Capture date (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_datetime)]
        capture_date: Option<OffsetDateTime>,

        /// Retrieval date (defaults to now)
        #[arg(long, value_parser = parse_datetime)]
        retrieve_date: Option<OffsetDateTime>,

        /// Client IP address
        #[arg(long)]
        ip: Option<IpAddr>,

        #[arg(long)]
        collection: Option<String>,

        #[arg(long)]
        partner: Option<String>,

        /// Only consider rules declaring exactly this negation
        #[arg(long)]
        neg_surt: Option<String>,

        /// Only consider rules for this environment (prod, test)
        #[arg(long)]
        environment: Option<String>,

        /// WARC filename checked against rules' warc_match
        #[arg(long)]
        warc: Option<String>,

        /// Ignore rule capture windows
        #[arg(long)]
        no_capture_filter: bool,

        /// Ignore rule retrieval windows
        #[arg(long)]
        no_retrieve_filter: bool,

        /// Ignore embargoes
        #[arg(long)]
        no_embargo_filter: bool,

        /// Include private comments
        #[arg(long)]
        include_private: bool,
    },

    /// Find rules stored under a URL or SURT fragment
    Search {
        #[arg(short, long)]
        rules: PathBuf,

        /// URL, SURT fragment, or either prefixed with a scheme
        term: String,

        #[arg(long)]
        include_private: bool,
    },

    /// List the domain labels below a SURT domain prefix
    Children {
        #[arg(short, long)]
        rules: PathBuf,

        /// Protocol root; empty searches every protocol
        #[arg(short, long, default_value = "")]
        protocol: String,

        /// Domain labels, top-level first (e.g. `org archive`)
        prefix: Vec<String>,
    },

    /// List rules by SURT
    List {
        #[arg(short, long)]
        rules: PathBuf,

        /// Only rules with exactly this SURT
        #[arg(long, conflicts_with = "surt_start")]
        surt_exact: Option<String>,

        /// Only rules whose SURT starts with this prefix
        #[arg(long)]
        surt_start: Option<String>,

        #[arg(long)]
        include_private: bool,
    },

    /// Validate a rules file
    Validate {
        /// Rules file to validate
        #[arg(short, long)]
        input: PathBuf,

        /// Print a JSON response envelope instead of a report
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let result = match cli.command {
        Commands::Surt { input, ancestors } => cmd_surt(&input, ancestors),
        Commands::Resolve {
            rules,
            target,
            protocol,
            capture_date,
            retrieve_date,
            ip,
            collection,
            partner,
            neg_surt,
            environment,
            warc,
            no_capture_filter,
            no_retrieve_filter,
            no_embargo_filter,
            include_private,
        } => {
            let mut ctx = ResolveContext::new();
            ctx.protocol = protocol.map(|p| p.to_ascii_lowercase());
            ctx.capture_date = capture_date;
            ctx.retrieve_date = retrieve_date;
            ctx.ip = ip;
            ctx.collection = collection;
            ctx.partner = partner;
            ctx.neg_surt = neg_surt;
            ctx.environment = environment;
            ctx.warc_name = warc;
            if no_capture_filter {
                ctx = ctx.without_filter(FilterFlags::CAPTURE_WINDOW);
            }
            if no_retrieve_filter {
                ctx = ctx.without_filter(FilterFlags::RETRIEVE_WINDOW);
            }
            if no_embargo_filter {
                ctx = ctx.without_filter(FilterFlags::EMBARGO);
            }
            cmd_resolve(&rules, &target, ctx, include_private)
        }
        Commands::Search {
            rules,
            term,
            include_private,
        } => cmd_search(&rules, &term, include_private),
        Commands::Children {
            rules,
            protocol,
            prefix,
        } => cmd_children(&rules, &protocol, &prefix),
        Commands::List {
            rules,
            surt_exact,
            surt_start,
            include_private,
        } => {
            let filter = match (surt_exact, surt_start) {
                (Some(surt), _) => RuleFilter::surt_exact(surt),
                (None, Some(prefix)) => RuleFilter::surt_prefix(prefix),
                (None, None) => RuleFilter::default(),
            };
            cmd_list(&rules, &filter, include_private)
        }
        Commands::Validate { input, json } => cmd_validate(&input, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn print_json(value: &Value) -> Result<(), String> {
    let text =
        serde_json::to_string_pretty(value).map_err(|e| format!("Failed to render JSON: {e}"))?;
    println!("{text}");
    Ok(())
}

fn cmd_surt(input: &str, ancestors: bool) -> Result<(), String> {
    let surt = Surt::from_surt_or_url(input);
    if surt.is_empty() {
        return Err(format!("Unable to canonicalize '{input}'"));
    }

    println!("{surt}");
    if ancestors {
        for ancestor in surt.ancestors().iter().skip(1) {
            println!("  {ancestor}");
        }
    }

    Ok(())
}

fn cmd_resolve(
    path: &Path,
    target: &str,
    mut ctx: ResolveContext,
    include_private: bool,
) -> Result<(), String> {
    let store = load_store(path)?;
    let surt = Surt::from_surt_or_url(target);
    if ctx.protocol.is_none() && !surt.protocol().is_empty() {
        ctx.protocol = Some(surt.protocol().to_string());
    }

    let rules = store.snapshot();
    let matched = Resolver::new(&rules).resolve(&surt, &ctx);
    print_json(&success(rules_summary(matched, include_private)))
}

fn cmd_search(path: &Path, term: &str, include_private: bool) -> Result<(), String> {
    let term = disambiguate(term).map_err(|e| e.to_string())?;
    let store = load_store(path)?;
    let rules = store.snapshot();
    let found = search_rules(&rules, &term);
    print_json(&success(rules_summary(found, include_private)))
}

fn cmd_children(path: &Path, protocol: &str, prefix: &[String]) -> Result<(), String> {
    let store = load_store(path)?;
    let snapshot = store.index();
    for child in snapshot.index().children_at(protocol, prefix) {
        println!("{child}");
    }
    Ok(())
}

fn cmd_list(path: &Path, filter: &RuleFilter, include_private: bool) -> Result<(), String> {
    let store = load_store(path)?;
    let rules = store.query(filter, RuleOrder::Surt);
    print_json(&success(rules_summary(&rules, include_private)))
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), String> {
    let content = read_rules_file(input)?;

    let problems = validate_rules(&content).map_err(|e| format!("Invalid rules file: {e}"))?;
    if json {
        return validate_json(&content, &problems);
    }
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {problem}");
        }
        return Err(format!("{} invalid rules in '{}'", problems.len(), input.display()));
    }

    let mut rules = parse_rules(&content).map_err(|e| format!("Invalid rules file: {e}"))?;
    let stats = optimize_rules(&mut rules);

    let mut by_policy: BTreeMap<&str, usize> = BTreeMap::new();
    for rule in &rules {
        *by_policy.entry(rule.policy.as_str()).or_default() += 1;
    }

    println!("Rules file '{}' is valid", input.display());
    println!(
        "  Rules:       {} -> {} (dedupe removed {})",
        stats.before, stats.after, stats.deduped
    );
    println!("  Disabled:    {}", stats.disabled);
    for (policy, count) in by_policy {
        println!("  {:<12} {}", format!("{policy}:"), count);
    }

    Ok(())
}

/// Validation outcome as a response envelope. Invalid documents still exit
/// non-zero after the envelope is printed.
fn validate_json(content: &str, problems: &[wr_compiler::RuleError]) -> Result<(), String> {
    if !problems.is_empty() {
        let details: Vec<Value> = problems.iter().map(|p| Value::from(p.to_string())).collect();
        let message = format!("{} invalid rules", problems.len());
        print_json(&error(&message, Some(Value::Array(details))))?;
        return Err(message);
    }

    let rules = parse_rules(content).map_err(|e| format!("Invalid rules file: {e}"))?;
    print_json(&success(rules_summary(&rules, true)))
}

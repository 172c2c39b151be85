use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use autoapply::Database;
use autoapply::models::{
    ApplicationStatus, JobApplication, NewJobApplication, NewUser, NewUserPreferences, User,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autoapply")]
#[command(about = "Track job applications, accounts and job-search preferences")]
struct Cli {
    /// Database file (defaults to the per-user data directory)
    #[arg(long, global = true, env = "AUTOAPPLY_DB")]
    db: Option<PathBuf>,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage job applications
    App {
        #[command(subcommand)]
        command: AppCommands,
    },

    /// Manage a user's job-search preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        email: String,
        name: String,

        /// LinkedIn account id
        #[arg(long)]
        linkedin_id: Option<String>,
    },

    /// List users
    List,

    /// Show a user
    Show {
        /// User ID or email
        user: String,
    },

    /// Delete a user along with its applications and preferences
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum AppCommands {
    /// Track a new application
    Add {
        /// Owning user ID
        #[arg(short, long)]
        user: i64,

        /// Job board's id for the posting
        #[arg(long)]
        job_id: String,

        #[arg(short, long)]
        company: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(long)]
        job_type: Option<String>,

        #[arg(long)]
        salary: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Initial status (defaults to DRAFT)
        #[arg(short, long)]
        status: Option<ApplicationStatus>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List a user's applications
    List {
        #[arg(short, long)]
        user: i64,

        /// Filter by status
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
    },

    /// Show application details
    Show { id: i64 },

    /// Set an application's status
    Status { id: i64, status: ApplicationStatus },

    /// Mark an application as submitted
    Applied { id: i64 },

    /// Delete an application
    Delete { id: i64 },

    /// Count a user's applications by status
    Stats {
        #[arg(short, long)]
        user: i64,
    },
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Show a user's preferences
    Show { user: i64 },

    /// Replace a user's preferences
    Set {
        user: i64,

        /// Desired job title (repeatable)
        #[arg(long = "title")]
        titles: Vec<String>,

        /// Desired location (repeatable)
        #[arg(long = "location")]
        locations: Vec<String>,

        /// Desired industry (repeatable)
        #[arg(long = "industry")]
        industries: Vec<String>,

        /// Desired job type (repeatable)
        #[arg(long = "job-type")]
        job_types: Vec<String>,

        #[arg(long)]
        experience: Option<String>,

        #[arg(long)]
        min_salary: Option<i32>,

        #[arg(long)]
        max_salary: Option<i32>,

        #[arg(long)]
        remote_only: bool,

        #[arg(long)]
        auto_apply: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = match &cli.db {
        Some(path) => Database::open_at(path)?,
        None => Database::open()?,
    };
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::User { command } => {
            db.ensure_initialized()?;
            run_user(&db, command, json)?;
        }

        Commands::App { command } => {
            db.ensure_initialized()?;
            run_app(&db, command, json)?;
        }

        Commands::Prefs { command } => {
            db.ensure_initialized()?;
            run_prefs(&db, command, json)?;
        }
    }

    Ok(())
}

fn run_user(db: &Database, command: UserCommands, json: bool) -> Result<()> {
    match command {
        UserCommands::Add {
            email,
            name,
            linkedin_id,
        } => {
            let mut new = NewUser::new(email, name);
            new.linkedin_id = linkedin_id;
            let user = db.create_user(new).context("Failed to create user")?;
            println!("Added user #{} <{}>", user.id, user.email);
        }

        UserCommands::List => {
            let users = db.list_users()?;
            if json {
                return print_json(&users);
            }
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<6} {:<30} {:<24} {:<20}", "ID", "EMAIL", "NAME", "LINKEDIN");
                println!("{}", "-".repeat(82));
                for user in users {
                    println!(
                        "{:<6} {:<30} {:<24} {:<20}",
                        user.id,
                        truncate(&user.email, 28),
                        truncate(&user.name, 22),
                        truncate(&user.linkedin_id.unwrap_or_default(), 18)
                    );
                }
            }
        }

        UserCommands::Show { user } => {
            let found = match user.parse::<i64>() {
                Ok(id) => db.get_user(id)?,
                Err(_) => db.get_user_by_email(&user)?,
            };
            let Some(found) = found else {
                println!("User '{}' not found.", user);
                return Ok(());
            };
            if json {
                return print_json(&found);
            }
            print_user(db, &found)?;
        }

        UserCommands::Delete { id } => {
            if db.delete_user(id)? {
                println!("Deleted user #{} and everything it owned.", id);
            } else {
                println!("User #{} not found.", id);
            }
        }
    }
    Ok(())
}

fn print_user(db: &Database, user: &User) -> Result<()> {
    println!("User #{}", user.id);
    println!("Email: {}", user.email);
    println!("Name: {}", user.name);
    if let Some(linkedin_id) = &user.linkedin_id {
        println!("LinkedIn: {}", linkedin_id);
    }
    println!("Signed in: {}", if user.access_token.is_some() { "yes" } else { "no" });
    println!("Created: {}", user.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated: {}", user.updated_at.format("%Y-%m-%d %H:%M:%S"));

    let apps = db.list_applications(user.id, None)?;
    if !apps.is_empty() {
        println!("\nApplications ({}):", apps.len());
        for app in apps {
            println!("  #{} - {} at {} ({})", app.id, app.job_title, app.company_name, app.status);
        }
    }
    Ok(())
}

fn run_app(db: &Database, command: AppCommands, json: bool) -> Result<()> {
    match command {
        AppCommands::Add {
            user,
            job_id,
            company,
            title,
            location,
            job_type,
            salary,
            description,
            status,
            notes,
        } => {
            let app = db
                .create_application(NewJobApplication {
                    location,
                    job_type,
                    salary_range: salary,
                    description,
                    status,
                    notes,
                    ..NewJobApplication::new(user, job_id, company, title)
                })
                .context("Failed to add application")?;
            println!("Added application #{} ({})", app.id, app.status);
        }

        AppCommands::List { user, status } => {
            let apps = db.list_applications(user, status)?;
            if json {
                return print_json(&apps);
            }
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<20} {:<28} {:<20} {:<12}",
                    "ID", "STATUS", "TITLE", "COMPANY", "APPLIED"
                );
                println!("{}", "-".repeat(90));
                for app in apps {
                    let applied = app
                        .applied_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<6} {:<20} {:<28} {:<20} {:<12}",
                        app.id,
                        app.status,
                        truncate(&app.job_title, 26),
                        truncate(&app.company_name, 18),
                        applied
                    );
                }
            }
        }

        AppCommands::Show { id } => match db.get_application(id)? {
            Some(app) if json => print_json(&app)?,
            Some(app) => print_application(&app),
            None => println!("Application #{} not found.", id),
        },

        AppCommands::Status { id, status } => {
            let app = db
                .set_application_status(id, status)
                .with_context(|| format!("Failed to update application #{}", id))?;
            println!("Application #{} is now {}.", app.id, app.status);
        }

        AppCommands::Applied { id } => {
            let app = db
                .mark_applied(id)
                .with_context(|| format!("Failed to update application #{}", id))?;
            let date = app
                .applied_date
                .ok_or_else(|| anyhow!("Application #{} has no applied date", id))?;
            println!("Application #{} applied on {}.", app.id, date.format("%Y-%m-%d"));
        }

        AppCommands::Delete { id } => {
            if db.delete_application(id)? {
                println!("Deleted application #{}.", id);
            } else {
                println!("Application #{} not found.", id);
            }
        }

        AppCommands::Stats { user } => {
            let stats = db.application_stats(user)?;
            if json {
                return print_json(&stats);
            }
            println!("{:<22} {:>6}", "STATUS", "COUNT");
            println!("{}", "-".repeat(29));
            for status in ApplicationStatus::ALL {
                println!("{:<22} {:>6}", status, stats.count(status));
            }
            println!("{}", "-".repeat(29));
            println!("{:<22} {:>6}", "IN PROGRESS", stats.in_progress());
            println!("{:<22} {:>6}", "TOTAL", stats.total);
        }
    }
    Ok(())
}

fn print_application(app: &JobApplication) {
    println!("Application #{}", app.id);
    println!("Title: {}", app.job_title);
    println!("Company: {}", app.company_name);
    println!("Job ID: {}", app.job_id);
    println!("Status: {}", app.status);
    if let Some(location) = &app.location {
        println!("Location: {}", location);
    }
    if let Some(job_type) = &app.job_type {
        println!("Type: {}", job_type);
    }
    if let Some(salary) = &app.salary_range {
        println!("Salary: {}", salary);
    }
    for (label, date) in [
        ("Applied", app.applied_date),
        ("Response", app.response_date),
        ("Interview", app.interview_date),
    ] {
        if let Some(date) = date {
            println!("{}: {}", label, date.format("%Y-%m-%d %H:%M"));
        }
    }
    println!("Created: {}", app.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated: {}", app.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(notes) = &app.notes {
        println!("\n--- Notes ---\n{}", notes);
    }
    if let Some(description) = &app.description {
        println!("\n--- Description ---\n{}", description);
    }
}

fn run_prefs(db: &Database, command: PrefsCommands, json: bool) -> Result<()> {
    match command {
        PrefsCommands::Show { user } => {
            let Some(prefs) = db.get_preferences_for_user(user)? else {
                println!("No preferences for user #{}.", user);
                return Ok(());
            };
            if json {
                return print_json(&prefs);
            }
            let list = |values: &std::collections::BTreeSet<String>| {
                if values.is_empty() {
                    "-".to_string()
                } else {
                    values.iter().cloned().collect::<Vec<_>>().join(", ")
                }
            };
            println!("Preferences for user #{}", prefs.user_id);
            println!("Titles: {}", list(&prefs.desired_job_titles));
            println!("Locations: {}", list(&prefs.desired_locations));
            println!("Industries: {}", list(&prefs.desired_industries));
            println!("Job types: {}", list(&prefs.desired_job_types));
            if let Some(level) = &prefs.experience_level {
                println!("Experience: {}", level);
            }
            match (prefs.min_salary, prefs.max_salary) {
                (Some(min), Some(max)) => println!("Salary: ${} - ${}", min, max),
                (Some(min), None) => println!("Salary: ${}+", min),
                (None, Some(max)) => println!("Salary: up to ${}", max),
                (None, None) => {}
            }
            println!("Remote only: {}", prefs.remote_only);
            println!("Auto-apply: {}", prefs.auto_apply);
            println!("Updated: {}", prefs.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }

        PrefsCommands::Set {
            user,
            titles,
            locations,
            industries,
            job_types,
            experience,
            min_salary,
            max_salary,
            remote_only,
            auto_apply,
        } => {
            let prefs = db
                .save_preferences(NewUserPreferences {
                    desired_job_titles: titles.into_iter().collect(),
                    desired_locations: locations.into_iter().collect(),
                    desired_industries: industries.into_iter().collect(),
                    desired_job_types: job_types.into_iter().collect(),
                    experience_level: experience,
                    min_salary,
                    max_salary,
                    remote_only,
                    auto_apply,
                    ..NewUserPreferences::for_user(user)
                })
                .with_context(|| format!("Failed to save preferences for user #{}", user))?;
            println!("Saved preferences #{} for user #{}.", prefs.id, prefs.user_id);
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_status_argument() {
        let cli = Cli::try_parse_from(["autoapply", "app", "status", "3", "interview-scheduled"])
            .unwrap();
        match cli.command {
            Commands::App {
                command: AppCommands::Status { id, status },
            } => {
                assert_eq!(id, 3);
                assert_eq!(status, ApplicationStatus::InterviewScheduled);
            }
            _ => panic!("expected app status"),
        }

        assert!(Cli::try_parse_from(["autoapply", "app", "status", "3", "hired"]).is_err());
    }

    #[test]
    fn test_parse_repeatable_preferences() {
        let cli = Cli::try_parse_from([
            "autoapply", "prefs", "set", "1", "--title", "SRE", "--title", "Engineer",
            "--location", "Remote", "--remote-only",
        ])
        .unwrap();
        match cli.command {
            Commands::Prefs {
                command:
                    PrefsCommands::Set {
                        titles,
                        locations,
                        remote_only,
                        auto_apply,
                        ..
                    },
            } => {
                assert_eq!(titles, vec!["SRE", "Engineer"]);
                assert_eq!(locations, vec!["Remote"]);
                assert!(remote_only);
                assert!(!auto_apply);
            }
            _ => panic!("expected prefs set"),
        }
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Zürich Engineering", 9), "Zürich...");
    }
}

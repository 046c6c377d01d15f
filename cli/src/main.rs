mod commands;
mod config;
mod gemini;
mod server;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;

use crate::commands::{
    RecipeFields, cmd_backup_csv, cmd_backup_export, cmd_backup_import, cmd_generate,
    cmd_notify_clear, cmd_notify_list, cmd_notify_read, cmd_plan_add, cmd_plan_remove,
    cmd_plan_week, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_import,
    cmd_recipe_list, cmd_recipe_show, cmd_shop_add, cmd_shop_clear, cmd_shop_delete,
    cmd_shop_list, cmd_shop_print, cmd_shop_toggle, cmd_user_add, cmd_user_list, cmd_user_token,
};
use crate::config::Config;
use crate::gemini::GeminiClient;
use pantry_core::db::Database;

#[derive(Parser)]
#[command(
    name = "pantry",
    version,
    about = "Plan meals, keep recipes and build one shopping list",
    long_about = "\n\n  ┌─┐┌─┐┌┐┌┌┬┐┬─┐┬ ┬
  ├─┘├─┤│││ │ ├┬┘└┬┘
  ┴  ┴ ┴┘└┘ ┴ ┴└─ ┴
   cook what you planned.
"
)]
struct Cli {
    /// Act as this user (default: $PANTRY_USER or "local")
    #[arg(long, global = true)]
    user: Option<String>,
    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users and their API tokens
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Plan meals on the calendar
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Work with the shopping list
    Shop {
        #[command(subcommand)]
        command: ShopCommands,
    },
    /// Generate a recipe from ingredients with Gemini
    Generate {
        /// Ingredients to cook with
        #[arg(required = true)]
        ingredients: Vec<String>,
        /// Extra wishes, e.g. "vegetarian, under 30 minutes"
        #[arg(short, long)]
        preferences: Option<String>,
        /// Save the generated recipe
        #[arg(long)]
        save: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export or import your data
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Read meal reminders and other notifications
    Notify {
        #[command(subcommand)]
        command: NotifyCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable token authentication; every request acts as --user
        #[arg(long)]
        no_auth: bool,
        /// Post breakfast, lunch and dinner reminders
        #[arg(long)]
        reminders: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        email: String,
        #[arg(long)]
        name: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Issue a new API token (replaces the old one)
    Token {
        email: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe
    Create {
        title: String,
        #[command(flatten)]
        fields: RecipeFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a recipe (by id or title)
    Edit {
        recipe: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: RecipeFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes
    List {
        /// Only titles containing this text
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe and its meal plan entries
    Delete {
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import recipes from Cooklang (.cook) files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Title override (single file only)
        #[arg(long)]
        name: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Plan a recipe for a meal
    Add {
        /// Recipe id or title
        recipe: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "dinner")]
        meal: String,
        /// Also put the recipe's ingredients on the shopping list
        #[arg(long)]
        shop: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a meal plan entry by id
    Remove {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the Monday-to-Sunday week containing a date
    Week {
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShopCommands {
    /// Show the list with matching items merged
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item
    Add {
        name: String,
        /// Amount (e.g. "200g", "2 cups", "3")
        #[arg(default_value = "1")]
        amount: String,
        /// Unit, when not part of the amount
        #[arg(short, long)]
        unit: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle an item by id, or every item with a name
    Toggle {
        target: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an item by id, or every item with a name
    Delete {
        target: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove purchased items
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a checklist of what is left to buy
    Print {
        /// Write a PDF to this path instead
        #[arg(long, value_name = "PATH")]
        pdf: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Export recipes and meal plans as JSON
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a JSON backup
    Import {
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export recipes as CSV
    Csv {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// List notifications, newest first
    List {
        /// Only unread ones
        #[arg(long)]
        unread: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a notification read
    Read {
        /// Notification id (or prefix)
        id: Option<String>,
        /// Mark all read
        #[arg(long, conflicts_with = "id")]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all notifications
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run_user(db: &Database, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add { email, name, json } => cmd_user_add(db, &email, name.as_deref(), json),
        UserCommands::Token { email, json } => cmd_user_token(db, &email, json),
        UserCommands::List { json } => cmd_user_list(db, json),
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    tracing::debug!(path = %config.db_path.display(), "database opened");

    // User management runs without an acting user.
    let command = match cli.command {
        Commands::User { command } => return run_user(&db, command),
        command => command,
    };

    let email = cli.user.unwrap_or_else(|| config.default_user.clone());
    let user = db.get_or_create_user(&email)?;
    let uid = user.id.as_str();

    match command {
        Commands::User { command } => run_user(&db, command),
        Commands::Recipe { command } => match command {
            RecipeCommands::Create {
                title,
                fields,
                json,
            } => cmd_recipe_create(&db, uid, &title, &fields, json),
            RecipeCommands::Edit {
                recipe,
                title,
                fields,
                json,
            } => cmd_recipe_edit(&db, uid, &recipe, title, &fields, json),
            RecipeCommands::List { search, json } => {
                cmd_recipe_list(&db, uid, search.as_deref(), json)
            }
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&db, uid, &recipe, json),
            RecipeCommands::Delete { recipe, json } => cmd_recipe_delete(&db, uid, &recipe, json),
            RecipeCommands::Import { files, name, json } => {
                cmd_recipe_import(&db, uid, &files, name, json)
            }
        },
        Commands::Plan { command } => match command {
            PlanCommands::Add {
                recipe,
                date,
                meal,
                shop,
                json,
            } => cmd_plan_add(&db, uid, &recipe, date, &meal, shop, json),
            PlanCommands::Remove { id, json } => cmd_plan_remove(&db, uid, &id, json),
            PlanCommands::Week { date, json } => cmd_plan_week(&db, uid, date, json),
        },
        Commands::Shop { command } => match command {
            ShopCommands::List { json } => cmd_shop_list(&db, uid, json),
            ShopCommands::Add {
                name,
                amount,
                unit,
                json,
            } => cmd_shop_add(&db, uid, &name, &amount, unit, json),
            ShopCommands::Toggle { target, json } => cmd_shop_toggle(&db, uid, &target, json),
            ShopCommands::Delete { target, json } => cmd_shop_delete(&db, uid, &target, json),
            ShopCommands::Clear { json } => cmd_shop_clear(&db, uid, json),
            ShopCommands::Print { pdf } => cmd_shop_print(&db, uid, pdf.as_deref()),
        },
        Commands::Generate {
            ingredients,
            preferences,
            save,
            json,
        } => {
            cmd_generate(
                &db,
                uid,
                &config.gemini,
                ingredients,
                preferences,
                save,
                json,
            )
            .await
        }
        Commands::Backup { command } => match command {
            BackupCommands::Export { output } => cmd_backup_export(&db, uid, output.as_deref()),
            BackupCommands::Import { file, json } => cmd_backup_import(&db, uid, &file, json),
            BackupCommands::Csv { output } => cmd_backup_csv(&db, uid, output.as_deref()),
        },
        Commands::Notify { command } => match command {
            NotifyCommands::List { unread, json } => cmd_notify_list(&db, uid, unread, json),
            NotifyCommands::Read { id, all, json } => {
                cmd_notify_read(&db, uid, id.as_deref(), all, json)
            }
            NotifyCommands::Clear { json } => cmd_notify_clear(&db, uid, json),
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
            reminders,
        } => {
            let generator = GeminiClient::new(&config.gemini).ok();
            let user_id = user.id.clone();
            server::start_server(
                db,
                user_id,
                generator,
                server::ServerOptions {
                    port,
                    bind,
                    auth: !no_auth,
                    reminders,
                },
            )
            .await
        }
    }
}

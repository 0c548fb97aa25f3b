use clap::Parser;
use htstore::{CredentialStore, HashScheme};
use snafu::{OptionExt, ResultExt};
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// Manage Apache-style credential files.
#[derive(Parser)]
#[command(name = "htstore")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Scheme for new password hashes (plain, crypt, md5, sha1)
    #[arg(long, global = true, default_value = "crypt")]
    scheme: HashScheme,

    /// Comma-separated schemes tried when verifying a password
    #[arg(long, global = true, value_delimiter = ',')]
    check_order: Vec<HashScheme>,

    /// More log output on stderr (repeatable); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Add a new user to the credential file
    Add {
        /// Path to the credential file
        file: PathBuf,
        /// Username to add
        username: String,
        /// Value of the third field
        #[arg(long)]
        extra_info: Option<String>,
        /// Create the file if it doesn't exist
        #[arg(long)]
        create: bool,
        /// Read password from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },

    /// Set a user's password, adding the user if missing
    Update {
        /// Path to the credential file
        file: PathBuf,
        /// Username to update
        username: String,
        /// New value of the third field; kept as is when omitted
        #[arg(long)]
        extra_info: Option<String>,
        /// Read password from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },

    /// Verify a user's password
    Verify {
        /// Path to the credential file
        file: PathBuf,
        /// Username to verify
        username: String,
        /// Read password from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },

    /// Show a user's record without the hash
    Show {
        /// Path to the credential file
        file: PathBuf,
        /// Username to show
        username: String,
    },

    /// List all users in the credential file
    List {
        /// Path to the credential file
        file: PathBuf,
        /// Also print the detected scheme of each user
        #[arg(long)]
        long: bool,
    },

    /// Delete a user from the credential file
    Delete {
        /// Path to the credential file
        file: PathBuf,
        /// Username to delete
        username: String,
    },
}

type Result<T> = ::std::result::Result<T, snafu::Whatever>;

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_password_from_stdin() -> Result<Zeroizing<String>> {
    let mut password = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut password)
        .whatever_context("Can't read password from stdin")?;
    Ok(Zeroizing::new(
        password.trim_end_matches(['\r', '\n']).to_string(),
    ))
}

fn prompt_password() -> Result<Zeroizing<String>> {
    rpassword::prompt_password("Enter password: ")
        .whatever_context("Can't prompt for password")
        .map(Zeroizing::new)
}

fn prompt_password_confirm() -> Result<Zeroizing<String>> {
    let password = Zeroizing::new(
        rpassword::prompt_password("New password: ")
            .whatever_context("Can't prompt for new password")?,
    );
    let confirm = Zeroizing::new(
        rpassword::prompt_password("Re-type new password: ")
            .whatever_context("Can't prompt for password re-type")?,
    );
    snafu::ensure_whatever!(*password == *confirm, "Passwords do not match");
    Ok(password)
}

fn new_password(from_stdin: bool) -> Result<Zeroizing<String>> {
    if from_stdin {
        read_password_from_stdin()
    } else {
        prompt_password_confirm()
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let open = |file: &PathBuf| {
        debug!(path = %file.display(), scheme = %cli.scheme, "opening credential file");
        let store = CredentialStore::new(file).with_default_scheme(cli.scheme);
        if cli.check_order.is_empty() {
            store
        } else {
            store.with_check_order(cli.check_order.clone())
        }
    };

    match &cli.command {
        Commands::Add {
            file,
            username,
            extra_info,
            create,
            stdin,
        } => {
            let password = new_password(*stdin)?;
            if *create {
                CredentialStore::create(file).whatever_context("Can't create credential file")?;
            }
            open(file)
                .add_user(username, &password, extra_info.as_deref())
                .whatever_context("Can't add user")?;

            println!("Adding password for user {}", username);
            Ok(())
        }

        Commands::Update {
            file,
            username,
            extra_info,
            stdin,
        } => {
            let password = new_password(*stdin)?;
            open(file)
                .update_user(username, &password, extra_info.as_deref())
                .whatever_context("Can't update user")?;

            println!("Updating password for user {}", username);
            Ok(())
        }

        Commands::Verify {
            file,
            username,
            stdin,
        } => {
            let password = if *stdin {
                read_password_from_stdin()?
            } else {
                prompt_password()?
            };

            match open(file).check_user_password(username, &password) {
                Ok(true) => {
                    println!("user {}: password correct", username);
                    Ok(())
                }
                Ok(false) => {
                    snafu::whatever!("user {}: password incorrect", username)
                }
                Err(e) => {
                    snafu::whatever!("user {}: {}", username, e)
                }
            }
        }

        Commands::Show { file, username } => {
            let record = open(file)
                .lookup_user(username)
                .whatever_context("Can't read credential file")?
                .whatever_context(format!("user {} not found", username))?;

            println!("user: {}", record.username());
            println!("scheme: {}", HashScheme::detect(record.hashed_password()));
            if let Some(extra) = record.extra_info() {
                println!("extra: {}", extra);
            }
            Ok(())
        }

        Commands::List { file, long } => {
            let records = open(file)
                .records()
                .whatever_context("Can't read credential file")?;

            for record in records {
                if *long {
                    let scheme = HashScheme::detect(record.hashed_password());
                    println!("{}\t{}", record.username(), scheme);
                } else {
                    println!("{}", record.username());
                }
            }

            Ok(())
        }

        Commands::Delete { file, username } => {
            open(file)
                .delete_user(username)
                .whatever_context("Can't delete user")?;

            println!("Deleting user {}", username);
            Ok(())
        }
    }
}

#[snafu::report]
fn main() -> Result<()> {
    run()
}

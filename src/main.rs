use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::PathBuf;

mod checkout;
mod clone;
mod commit;
mod delta;
mod errors;
mod object;
mod pack;
mod pkt;
mod protocol;
mod store;
mod tree;

use object::{object_id, ObjKind};
use store::ObjectStore;

#[derive(Parser)]
#[command(name = "minigit", about = "a small git client", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty repository
    Init {
        path: Option<PathBuf>,
    },
    /// Print the content of a stored object
    CatFile {
        /// pretty-print the object's content
        #[arg(short = 'p')]
        pretty: bool,
        object: String,
    },
    /// Compute a blob's object id, optionally storing it
    HashObject {
        /// write the object to the object database
        #[arg(short = 'w')]
        write: bool,
        file: PathBuf,
    },
    /// List a tree object's entries
    LsTree {
        #[arg(long)]
        name_only: bool,
        tree: String,
    },
    /// Hash the working directory into a tree object
    WriteTree,
    /// Create a commit object for a tree
    CommitTree {
        tree: String,
        #[arg(short = 'p')]
        parent: Option<String>,
        #[arg(short = 'm')]
        message: String,
    },
    /// Clone a remote repository over smart HTTP
    Clone {
        url: String,
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Init { path } => {
            let path = path.unwrap_or_else(|| PathBuf::from("."));
            fs::create_dir_all(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            ObjectStore::init(&path)?;
            println!(
                "Initialized empty Git repository in {}/.git/",
                fs::canonicalize(&path)?.display()
            );
        }
        Command::CatFile { pretty, object } => {
            ensure!(pretty, "cat-file requires -p");
            let store = ObjectStore::from_cwd()?;
            let (_kind, content) = store.get(&object)?;
            io::stdout().write_all(&content)?;
        }
        Command::HashObject { write, file } => {
            let content = fs::read(&file)
                .with_context(|| format!("could not read {}", file.display()))?;
            let id = if write {
                ObjectStore::from_cwd()?.put(ObjKind::Blob, &content)?
            } else {
                object_id(ObjKind::Blob, &content)
            };
            println!("{}", id);
        }
        Command::LsTree { name_only, tree } => {
            let store = ObjectStore::from_cwd()?;
            tree::ls_tree(&store, &tree, name_only)?;
        }
        Command::WriteTree => {
            let store = ObjectStore::from_cwd()?;
            println!("{}", tree::tree_from_workdir(&store)?);
        }
        Command::CommitTree {
            tree,
            parent,
            message,
        } => {
            let store = ObjectStore::from_cwd()?;
            let content = commit::build_commit(&tree, parent.as_deref(), &message);
            println!("{}", store.put(ObjKind::Commit, &content)?);
        }
        Command::Clone { url, dir } => {
            clone::clone(&url, &dir)?;
        }
    }
    Ok(())
}

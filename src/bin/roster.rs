use clap::{ArgAction, Parser, Subcommand};
use log::{debug, error};
use roster::{
    EngineKind, NaiveThreadPool, PoolKind, RayonThreadPool, Result, RosterStore,
    SharedQueueThreadPool, SledStore, StoreConfig, StoreError, Student, StudentEngine,
    StudentStore, ThreadPool,
};
use std::env::current_dir;
use std::path::PathBuf;
use std::process::exit;
use stderrlog::{LogLevelNum, Timestamp};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, author, about, disable_help_subcommand = true)]
struct Cli {
    /// Data directory. Defaults to the current directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Either "roster" or "sled". Must match the engine the data was created with.
    #[arg(short, long, global = true)]
    engine: Option<EngineKind>,

    /// One of naive, shared_queue or rayon.
    #[arg(short, long = "thread-pool", global = true)]
    thread_pool: Option<PoolKind>,

    /// Worker count of the thread pool.
    #[arg(short = 'n', long = "worker-num", global = true)]
    worker_num: Option<u32>,

    /// Log more; repeat for more detail.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a student, replacing the name if the MSSV already exists
    Add {
        mssv: String,
        hoten: String,
        /// Fail instead of replacing an existing student
        #[arg(long)]
        strict: bool,
    },
    /// Look a student up by MSSV
    Get { mssv: String },
    /// List every student
    List,
    /// Students whose MSSV or name contains QUERY (case-sensitive)
    Search { query: String },
    /// Students whose name matches a LIKE pattern (% and _ wildcards)
    FindName { pattern: String },
    /// Delete the given students
    Rm { keys: Vec<String> },
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LogLevelNum::Warn,
        1 => LogLevelNum::Info,
        2 => LogLevelNum::Debug,
        _ => LogLevelNum::Trace,
    };
    if let Err(e) = stderrlog::new()
        .module(module_path!())
        .timestamp(Timestamp::Second)
        .verbosity(level)
        .init()
    {
        eprintln!("Failed to initialise logging: {e}");
    }

    if let Err(e) = run(cli) {
        error!("{e}");
        match e {
            StoreError::DuplicateKey(mssv) => println!("Student already exists: {mssv}"),
            e => eprintln!("{e}"),
        }
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let dir = match cli.dir {
        Some(dir) => dir,
        None => current_dir()?,
    };
    let config = StoreConfig::resolve(&dir, cli.engine, cli.thread_pool, cli.worker_num)?;
    debug!(
        "ENGINE: {}, POOL: {} x {}",
        config.engine,
        config.thread_pool(),
        config.worker_num()
    );

    match config.engine {
        EngineKind::Roster => with_pool(RosterStore::open(&dir)?, &config, cli.command),
        EngineKind::Sled => with_pool(SledStore::open(&dir)?, &config, cli.command),
    }
}

fn with_pool<E: StudentEngine>(engine: E, config: &StoreConfig, command: Commands) -> Result<()> {
    let workers = config.worker_num();
    match config.thread_pool() {
        PoolKind::Naive => execute(StudentStore::new(engine, NaiveThreadPool::new(workers)?), command),
        PoolKind::SharedQueue => execute(
            StudentStore::new(engine, SharedQueueThreadPool::new(workers)?),
            command,
        ),
        PoolKind::Rayon => execute(StudentStore::new(engine, RayonThreadPool::new(workers)?), command),
    }
}

fn execute<E: StudentEngine, P: ThreadPool>(store: StudentStore<E, P>, command: Commands) -> Result<()> {
    match command {
        Commands::Add { mssv, hoten, strict } => {
            if mssv.is_empty() || hoten.is_empty() {
                println!("MSSV and Name are required!");
                exit(1);
            }
            let student = Student::new(mssv, hoten);
            if strict {
                store.insert(student).wait()?;
            } else {
                store.insert_or_replace(student).wait()?;
            }
            println!("Student added!");
        }
        Commands::Get { mssv } => match store.find_by_key(mssv).wait()?.first() {
            Some(student) => println!("{student}"),
            None => println!("Student not found"),
        },
        Commands::List => print_all(&store.get_all().wait()?),
        Commands::Search { query } => print_all(&store.search(query).wait()?),
        Commands::FindName { pattern } => print_all(&store.find_by_name(pattern).wait()?),
        Commands::Rm { keys } => {
            if keys.is_empty() {
                println!("No students selected!");
                exit(1);
            }
            match store.delete_multiple(keys).wait()? {
                0 => println!("No rows affected"),
                n => println!("Deleted {n} student(s)"),
            }
        }
    }
    Ok(())
}

fn print_all(students: &[Student]) {
    for student in students {
        println!("{student}");
    }
}

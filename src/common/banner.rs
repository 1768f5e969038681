const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

pub struct BannerInfo {
    pub version: &'static str,
    pub profile: &'static str,
    pub nodes: usize,
    pub rest_version: String,
}

impl BannerInfo {
    pub fn new(nodes: usize, rest_version: impl Into<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
            nodes,
            rest_version: rest_version.into(),
        }
    }
}

pub fn print_banner(info: &BannerInfo) {
    println!();
    println!("{GREEN}    ____  _ ________         {RESET}");
    println!("{GREEN}   / __ \\(_) __/ __/_  __    {RESET}");
    println!("{GREEN}  / /_/ / / /_/ /_/ / / /    {RESET}");
    println!("{GREEN} / _, _/ / __/ __/ /_/ /     {RESET}");
    println!("{GREEN}/_/ |_/_/_/ /_/  \\__, /      {RESET}");
    println!("{GREEN}                /____/       {RESET}");
    println!("{DIM}========================================{RESET}");
    println!();

    print_row("Version", info.version, CYAN);
    print_row("Profile", info.profile, YELLOW);
    print_row("Nodes", &info.nodes.to_string(), RESET);
    print_row("REST", &info.rest_version, RESET);
    println!();
}

fn print_row(label: &str, value: &str, color: &str) {
    println!("  {BOLD}{label:<14}{RESET}{color}{value}{RESET}");
}

//! Utilities for terminal output during scanning.

/// Terminal User Interface Module for `IPTVScan`
/// Defines macros to use
#[macro_export]
macro_rules! warning {
    ($name:expr) => {{
        use ::colored::Colorize;
        println!("{} {}", "[!]".red().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use ::colored::Colorize;
        // if not greppable then print, otherwise no else statement so do not print.
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[!]".red().bold(), $name);
            }
        }
    }};
}

#[macro_export]
macro_rules! detail {
    ($name:expr) => {{
        use ::colored::Colorize;
        println!("{} {}", "[~]".blue().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use ::colored::Colorize;
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[~]".blue().bold(), $name);
            }
        }
    }};
}

#[macro_export]
macro_rules! output {
    ($name:expr) => {{
        use ::colored::Colorize;
        println!("{} {}", "[>]".green().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use ::colored::Colorize;
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[>]".green().bold(), $name);
            }
        }
    }};
}

use std::path::PathBuf;

use subvault_core::config;

pub(crate) fn run_config_generate(dest: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let path = match dest {
        Some(d) => PathBuf::from(d),
        None => pick_config_location()?,
    };

    if path.exists() {
        return Err(format!("file already exists: {}", path.display()).into());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(&path, config::minimal_config_template())?;
    println!("Config written to: {}", path.display());
    println!("Edit it to point at your database and pick a data directory.");
    Ok(())
}

fn pick_config_location() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let search_paths = config::default_config_search_paths();

    eprintln!("Where should the config file live?");
    for (i, (path, level)) in search_paths.iter().enumerate() {
        eprintln!("  [{}] {} ({level})", i + 1, path.display());
    }
    eprint!("Choice [1]: ");
    std::io::Write::flush(&mut std::io::stderr())?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let selection = parse_choice(input.trim(), search_paths.len())?;
    Ok(search_paths[selection].0.clone())
}

/// Zero-based index for a 1-based menu answer; empty picks the first entry.
fn parse_choice(input: &str, options: usize) -> Result<usize, String> {
    if input.is_empty() {
        return Ok(0);
    }
    let n: usize = input
        .parse()
        .map_err(|_| format!("invalid choice: '{input}'"))?;
    if n == 0 || n > options {
        return Err(format!("choice out of range: {n}"));
    }
    Ok(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answer_picks_first_location() {
        assert_eq!(parse_choice("", 3), Ok(0));
        assert_eq!(parse_choice("3", 3), Ok(2));
    }

    #[test]
    fn out_of_range_answers_are_rejected() {
        assert!(parse_choice("0", 3).is_err());
        assert!(parse_choice("4", 3).is_err());
        assert!(parse_choice("two", 3).is_err());
    }

    #[test]
    fn generated_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("subvault.yaml");
        let dest_str = dest.to_str().unwrap();

        run_config_generate(Some(dest_str)).unwrap();
        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, config::minimal_config_template());
        assert!(run_config_generate(Some(dest_str)).is_err());
    }
}

use anyhow::Context;
use clap::Parser;
use nos_core::actions::{ActionRequest, Actions, Orchestrator};
use nos_core::client::NuggetClient;
use nos_core::image::FirmwareImage;

const LONG_ABOUT: &str = "\
Citadel firmware boots in two stages. The first stage bootloader (aka \"RO\")
is provided by the SOC hardware team and seldom changes. The application
image (\"RW\") is invoked by the RO image. There are two copies (A/B) of each
stage, so that the active copy can be protected while the unused copy is
updated. At boot, the newer valid copy of each stage is selected.

The Citadel image file is the same size as the internal flash and contains
all four firmware components (RO_A, RW_A, RO_B, RW_B) at the correct
offsets. Only the inactive copy (A/B) of each stage can be modified; the
tool updates the correct copies automatically.

You must specify the actions to perform. With no actions, this help message
is displayed.";

#[derive(Parser, Debug)]
#[command(
    name = "citadel-updater",
    about = "Update and manage Citadel firmware",
    long_about = LONG_ABOUT,
    disable_version_flag = true
)]
struct Args {
    /// Display the Citadel version info
    #[arg(short = 'v', long)]
    version: bool,

    /// Update RW firmware from the image file
    #[arg(long)]
    rw: bool,

    /// Update RO firmware from the image file
    #[arg(long)]
    ro: bool,

    /// Tell Citadel to reboot
    #[arg(long)]
    reboot: bool,

    /// Enable the specified RO image ("pw" may be empty)
    #[arg(long = "enable_ro")]
    enable_ro: bool,

    /// Enable the specified RW image ("pw" may be empty)
    #[arg(long = "enable_rw")]
    enable_rw: bool,

    /// Change the update password ("new_pw" may be empty to clear it)
    #[arg(long = "change_pw")]
    change_pw: bool,

    /// Erase the chip, guarded by a confirmation code (decimal or 0xHEX)
    #[arg(long, value_name = "CODE", value_parser = parse_erase_code)]
    erase: Option<u32>,

    /// Device to open
    #[arg(long, value_name = "PATH", default_value = "/dev/citadel0")]
    device: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// [image.bin] then [old_pw] new_pw (--change_pw) or pw (enable actions)
    #[arg(value_name = "ARGS")]
    rest: Vec<String>,
}

fn parse_erase_code(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid erase code: {s}"))
}

/// Split the positionals into image path and passwords, per the actions.
fn assign_positionals(
    actions: &Actions,
    rest: &[String],
) -> Result<(Option<String>, Option<String>, Option<String>), String> {
    let mut rest = rest.iter();

    let image_path = if actions.needs_image() {
        Some(
            rest.next()
                .ok_or("an image file is required with --ro and --rw")?
                .clone(),
        )
    } else {
        None
    };

    let passwords: Vec<&String> = rest.collect();
    let (old_password, new_password) = if actions.needs_password() {
        match passwords.as_slice() {
            [] => return Err("a password is required for this action".into()),
            [new] => (None, Some((*new).clone())),
            [old, new] if actions.change_pw => (Some((*old).clone()), Some((*new).clone())),
            _ => return Err("too many arguments".into()),
        }
    } else {
        if !passwords.is_empty() {
            return Err("too many arguments".into());
        }
        (None, None)
    };

    Ok((image_path, old_password, new_password))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let actions = Actions {
        version: args.version,
        rw: args.rw,
        ro: args.ro,
        reboot: args.reboot,
        enable_ro: args.enable_ro,
        enable_rw: args.enable_rw,
        change_pw: args.change_pw,
        erase: args.erase,
    };

    if !actions.any() {
        use clap::CommandFactory;
        Args::command().print_long_help().ok();
        return;
    }

    let (image_path, old_password, new_password) = match assign_positionals(&actions, &args.rest)
    {
        Ok(split) => split,
        Err(message) => {
            eprintln!("ERROR: {message}");
            std::process::exit(1);
        }
    };

    // Read and validate the image before touching the device.
    let image = match image_path {
        Some(path) => {
            let loaded = FirmwareImage::from_file(&path)
                .with_context(|| format!("can't load image {path}"));
            match loaded {
                Ok(image) => Some(image),
                Err(err) => {
                    eprintln!("ERROR: {err:#}");
                    std::process::exit(1);
                }
            }
        }
        None => None,
    };

    let request = ActionRequest {
        actions,
        image,
        old_password,
        new_password,
    };

    let mut client = NuggetClient::new(&args.device);
    let mut orchestrator = Orchestrator::new(&mut client);
    let code = orchestrator.run(&request);
    let errors = orchestrator.errors();

    if code != 0 {
        std::process::exit(code as i32);
    }
    std::process::exit(if errors > 0 { 1 } else { 0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(rw: bool, change_pw: bool, enable_rw: bool) -> Actions {
        Actions {
            rw,
            change_pw,
            enable_rw,
            ..Actions::default()
        }
    }

    #[test]
    fn test_image_consumed_first_for_updates() {
        let rest = vec!["image.bin".to_string()];
        let (image, old, new) = assign_positionals(&actions(true, false, false), &rest).unwrap();
        assert_eq!(image.as_deref(), Some("image.bin"));
        assert!(old.is_none());
        assert!(new.is_none());
    }

    #[test]
    fn test_update_without_image_is_rejected() {
        assert!(assign_positionals(&actions(true, false, false), &[]).is_err());
    }

    #[test]
    fn test_change_pw_takes_old_and_new() {
        let rest = vec!["oldpw".to_string(), "newpw".to_string()];
        let (_, old, new) = assign_positionals(&actions(false, true, false), &rest).unwrap();
        assert_eq!(old.as_deref(), Some("oldpw"));
        assert_eq!(new.as_deref(), Some("newpw"));
    }

    #[test]
    fn test_change_pw_single_password_is_the_new_one() {
        let rest = vec!["newpw".to_string()];
        let (_, old, new) = assign_positionals(&actions(false, true, false), &rest).unwrap();
        assert!(old.is_none());
        assert_eq!(new.as_deref(), Some("newpw"));
    }

    #[test]
    fn test_enable_takes_one_password_after_image() {
        let rest = vec!["image.bin".to_string(), "pw".to_string()];
        let (image, old, new) = assign_positionals(&actions(true, false, true), &rest).unwrap();
        assert_eq!(image.as_deref(), Some("image.bin"));
        assert!(old.is_none());
        assert_eq!(new.as_deref(), Some("pw"));
    }

    #[test]
    fn test_enable_rejects_two_passwords() {
        let rest = vec!["a".to_string(), "b".to_string()];
        assert!(assign_positionals(&actions(false, false, true), &rest).is_err());
    }

    #[test]
    fn test_stray_positionals_are_rejected() {
        let rest = vec!["stray".to_string()];
        assert!(assign_positionals(&Actions::default(), &rest).is_err());
    }

    #[test]
    fn test_erase_code_parses_hex_and_decimal() {
        assert_eq!(parse_erase_code("0xDEADBEEF").unwrap(), 0xdead_beef);
        assert_eq!(parse_erase_code("42").unwrap(), 42);
        assert!(parse_erase_code("nope").is_err());
    }
}

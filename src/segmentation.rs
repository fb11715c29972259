//! Interactive segmentation quality gate.
//!
//! Not automatable: a human reviews the surface reconstruction in freeview,
//! repairs `wm.mgz` where needed, and decides whether to rerun the surface
//! reconstruction. Loops until the reviewer declines further changes.

use std::io::{self, BufRead, Write};

use crate::config::Config;
use crate::paths::sub;
use crate::shell::{self, s, Res};

pub fn check_segmentation(config: &Config) -> Res<()> {
    for subject in config.roster.keys() {
        review_subject(config, subject)?;
    }
    Ok(())
}

fn review_subject(config: &Config, subject: &str) -> Res<()> {
    let fs_dir = config.layout.fs_subject_dir(subject);
    let mri = fs_dir.join("mri");
    let surf = fs_dir.join("surf");
    loop {
        shell::run("freeview", &[
            "-v".into(),
            s(&mri.join("T1.mgz")),
            format!("{}:visible=0", s(&mri.join("brainmask.mgz"))),
            format!("{}:colormap=heat:opacity=0.40:heatscale=100,250", s(&mri.join("wm.mgz"))),
            "-f".into(),
            format!("{}:edgecolor=yellow", s(&surf.join("lh.smoothwm"))),
            format!("{}:edgecolor=yellow", s(&surf.join("rh.smoothwm"))),
            format!("{}:edgecolor=blue", s(&surf.join("lh.pial.T1"))),
            format!("{}:edgecolor=blue", s(&surf.join("rh.pial.T1"))),
        ])?;

        // fix any errors in wm.mgz, close freeview, then answer
        if ask("Rerun surface reconstruction? (y/n)")? == "y" {
            shell::run("recon-all", &[
                "-autorecon2-wm".into(),
                "-autorecon3".into(),
                "-subjid".into(),
                sub(subject),
            ])?;
        } else {
            break;
        }
    }
    Ok(())
}

fn ask(prompt: &str) -> Res<String> {
    print!("{prompt} ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

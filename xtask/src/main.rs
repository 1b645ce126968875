//! Build + task support for bundle-operator.

use std::{
    fs::File,
    path::{Path, PathBuf},
    process,
};

use kube::{CustomResourceExt, Resource};

use api::v1alpha1::Bundle;

fn main() {
    use clap::{Command, crate_authors, crate_name, crate_version};
    let cmd = Command::new(crate_name!())
        .author(crate_authors!())
        .version(crate_version!())
        .about("Build + task support for bundle-operator")
        .subcommand_required(true)
        .subcommands(&[
            Command::new("manifests").about("generate CRD manifests into config/crd")
        ]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("manifests", _)) => manifests(),
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

type DynError = Box<dyn std::error::Error>;
type Result<T> = std::result::Result<T, DynError>;

fn workspace() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn manifests() -> Result<()> {
    let out = workspace().join("config/crd");
    std::fs::create_dir_all(&out)?;
    write_crd::<Bundle, _>(&out)?;
    Ok(())
}

fn write_crd<K, P>(out_dir: P) -> Result<()>
where
    K: Resource<DynamicType = ()> + CustomResourceExt,
    P: AsRef<Path>,
{
    let doc = serde_json::to_value(K::crd())?;
    let out = out_dir.as_ref().join(format!("{}.yaml", K::crd_name()));
    let w = File::create(&out)?;
    serde_yaml::to_writer(&w, &doc)?;
    eprintln!("# wrote: {}", out.display());
    Ok(())
}

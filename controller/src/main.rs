use std::io::Read;

use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use api::v1alpha1::Bundle;
use bundle_core::extract::ExtractOptions;
use bundle_core::order::execution_order;
use bundle_core::validate::validate_bundle;
use controller::discovery::{self, DiscoverOptions, OutputFormat, TargetType};
use controller::Result;
use endpoint_catalog::{Catalog, PathDescriptor, resolve_kind, resolve_plural};

fn main() {
    use clap::{
        Arg, ArgAction, Command, ValueHint, crate_authors, crate_description, crate_name,
        crate_version,
    };
    use std::process;
    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([
            Command::new("nodes")
                .about("discover workloads and emit the node model")
                .args([
                    Arg::new("namespace")
                        .long("namespace")
                        .short('n')
                        .help("namespace to list in; cluster-wide when unset"),
                    Arg::new("include_pods")
                        .long("include-pods")
                        .help("also emit one node per backing pod")
                        .action(ArgAction::SetTrue),
                    Arg::new("pods_only")
                        .long("pods-only")
                        .help("emit pod nodes only")
                        .action(ArgAction::SetTrue),
                    Arg::new("healthy_only")
                        .long("healthy-only")
                        .help("keep only fully healthy workloads")
                        .action(ArgAction::SetTrue),
                    Arg::new("unhealthy_only")
                        .long("unhealthy-only")
                        .help("keep only degraded workloads")
                        .action(ArgAction::SetTrue),
                    Arg::new("exclude_operator")
                        .long("exclude-operator")
                        .help("exclude operator and controller-manager workloads")
                        .action(ArgAction::SetTrue),
                    Arg::new("ready_only")
                        .long("ready-only")
                        .help("keep only pods whose containers all report ready")
                        .action(ArgAction::SetTrue),
                    Arg::new("include_type")
                        .long("include-type")
                        .help("node type to include (sts, deploy, helm, pod); repeatable")
                        .action(ArgAction::Append),
                    Arg::new("exclude_type")
                        .long("exclude-type")
                        .help("node type to exclude; repeatable")
                        .action(ArgAction::Append),
                    Arg::new("exclude_labels")
                        .long("exclude-labels")
                        .help("label selector excluding matching workloads; repeatable")
                        .action(ArgAction::Append),
                    Arg::new("name_glob")
                        .long("name-glob")
                        .help("workload name glob to include; repeatable")
                        .action(ArgAction::Append),
                    Arg::new("exclude_name_glob")
                        .long("exclude-name-glob")
                        .action(ArgAction::Append),
                    Arg::new("namespace_glob")
                        .long("namespace-glob")
                        .action(ArgAction::Append),
                    Arg::new("exclude_namespace_glob")
                        .long("exclude-namespace-glob")
                        .action(ArgAction::Append),
                    Arg::new("exclude_namespace")
                        .long("exclude-namespace")
                        .action(ArgAction::Append),
                    Arg::new("pod_status")
                        .long("pod-status")
                        .help("pod phase to keep when expanding; repeatable")
                        .action(ArgAction::Append),
                    Arg::new("pod_name_glob")
                        .long("pod-name-glob")
                        .action(ArgAction::Append),
                    Arg::new("max_pods")
                        .long("max-pods-per-workload")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                    Arg::new("cluster").long("cluster").help("cluster name attribution"),
                    Arg::new("cluster_url").long("cluster-url"),
                    Arg::new("cluster_token_suffix").long("cluster-token-suffix"),
                    Arg::new("tag")
                        .long("tag")
                        .help("tag set on every node; repeatable")
                        .action(ArgAction::Append),
                    Arg::new("attribute")
                        .long("attribute")
                        .help("extra key=value attribute set on every node; repeatable")
                        .action(ArgAction::Append),
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .help("output format: json, yaml, or table")
                        .default_value("table"),
                ]),
            Command::new("order")
                .about("print the execution order of a bundle manifest")
                .args([
                    Arg::new("file")
                        .help("bundle manifest, YAML or JSON; - for stdin")
                        .value_hint(ValueHint::FilePath)
                        .default_value("-"),
                    Arg::new("bare")
                        .long("include-bare-refs")
                        .help("also treat bare resources.<id> references in specs as edges")
                        .action(ArgAction::SetTrue),
                ]),
            Command::new("endpoints")
                .about("classify API path descriptors")
                .arg(
                    Arg::new("file")
                        .help("descriptor document, YAML or JSON; - for stdin")
                        .value_hint(ValueHint::FilePath)
                        .default_value("-"),
                ),
        ]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("nodes", m)) => nodes(m),
        Some(("order", m)) => order(m),
        Some(("endpoints", m)) => endpoints(m),
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

fn init_tracing() -> Result<()> {
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stderr().is_terminal() {
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        } else {
            None
        })
        .with(if std::io::stderr().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        });
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

fn strings(m: &clap::ArgMatches, id: &str) -> Vec<String> {
    m.get_many::<String>(id)
        .map(|v| v.cloned().collect())
        .unwrap_or_default()
}

fn types(m: &clap::ArgMatches, id: &str) -> Result<Vec<TargetType>> {
    strings(m, id)
        .iter()
        .map(|s| {
            s.parse()
                .map_err(|_| anyhow::anyhow!("unknown node type {s:?}").into())
        })
        .collect()
}

fn discover_options(m: &clap::ArgMatches) -> Result<DiscoverOptions> {
    let mut extra_attributes = std::collections::BTreeMap::new();
    for kv in strings(m, "attribute") {
        let (k, v) = kv
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("attribute {kv:?} is not key=value"))?;
        extra_attributes.insert(k.to_string(), v.to_string());
    }
    Ok(DiscoverOptions {
        namespace: m.get_one::<String>("namespace").cloned(),
        namespace_globs: strings(m, "namespace_glob"),
        exclude_namespace_globs: strings(m, "exclude_namespace_glob"),
        exclude_namespaces: strings(m, "exclude_namespace"),
        include_types: types(m, "include_type")?,
        exclude_types: types(m, "exclude_type")?,
        exclude_labels: strings(m, "exclude_labels"),
        exclude_operator: m.get_flag("exclude_operator"),
        healthy_only: m.get_flag("healthy_only"),
        unhealthy_only: m.get_flag("unhealthy_only"),
        name_globs: strings(m, "name_glob"),
        exclude_name_globs: strings(m, "exclude_name_glob"),
        include_pods: m.get_flag("include_pods"),
        pods_only: m.get_flag("pods_only"),
        pod_statuses: strings(m, "pod_status"),
        pod_name_globs: strings(m, "pod_name_glob"),
        ready_only: m.get_flag("ready_only"),
        max_pods_per_workload: *m.get_one::<usize>("max_pods").unwrap(),
        cluster: m.get_one::<String>("cluster").cloned(),
        cluster_url: m.get_one::<String>("cluster_url").cloned(),
        cluster_token_suffix: m.get_one::<String>("cluster_token_suffix").cloned(),
        tags: strings(m, "tag"),
        extra_attributes,
        ..Default::default()
    })
}

fn nodes(m: &clap::ArgMatches) -> Result<()> {
    use tokio::{runtime, signal};

    init_tracing()?;
    let opts = discover_options(m)?;
    let format: OutputFormat = m.get_one::<String>("output").unwrap().parse()?;

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let config = kube::Config::infer().await?;
        let client = kube::client::ClientBuilder::try_from(config)?.build();

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            if let Err(err) = signal::ctrl_c().await {
                error!("error reading SIGINT: {err}");
            }
            cancel.cancel();
        });

        let nodes = discovery::discover(client, &opts, token).await?;
        info!(nodes = nodes.len(), "discovery complete");
        let out = discovery::render(&nodes, format)?;
        print!("{out}");
        if !out.ends_with('\n') {
            println!();
        }
        Ok(())
    })
}

fn order(m: &clap::ArgMatches) -> Result<()> {
    init_tracing()?;
    let buf = read_input(m.get_one::<String>("file").unwrap())?;
    let bundle: Bundle = serde_yaml::from_str(&buf)?;
    validate_bundle(&bundle.spec.resources)?;
    let opts = ExtractOptions {
        include_bare_refs: m.get_flag("bare"),
        ..Default::default()
    };
    for id in execution_order(&bundle.spec.resources, &opts)? {
        println!("{id}");
    }
    Ok(())
}

fn endpoints(m: &clap::ArgMatches) -> Result<()> {
    init_tracing()?;
    let buf = read_input(m.get_one::<String>("file").unwrap())?;
    let descs: Vec<PathDescriptor> = serde_yaml::from_str(&buf)?;
    let catalog = Catalog::build(&descs);
    for (name, paths) in catalog.resources() {
        println!(
            "resource {kind} (plural {plural}): {n} endpoint(s)",
            kind = resolve_kind(name),
            plural = resolve_plural(name),
            n = paths.len(),
        );
    }
    for q in catalog.queries() {
        println!("query    {q}");
    }
    for a in catalog.actions() {
        println!("action   {a}");
    }
    Ok(())
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(std::fs::read_to_string(path)?)
}

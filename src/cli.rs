use std::fs;

use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;

use crate::{
    config::ModelConfig,
    errors::ModelError,
    import::{import_text, TextFile},
    model::{GraphOptions, NetworkModel},
    rules::RuleRegistry,
    store::BlobStore,
    table::{BuildOutcome, TableId},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLineConfig {
    pub database: String,
    pub model: String,
    pub command: String,
    pub command_args: Vec<String>,
}

impl Default for CommandLineConfig {
    fn default() -> Self {
        Self {
            database: String::from("memory"),
            model: String::from("default"),
            command: String::from("status"),
            command_args: Vec::new(),
        }
    }
}

impl CommandLineConfig {
    /// Global flags come first; the first bare word (or the value of
    /// `--command`) names the command and everything after it belongs to
    /// the command.
    pub fn from_args(args: &[&str]) -> Result<Self, String> {
        let mut config = Self::default();
        let mut rest = args.get(1..).unwrap_or_default();
        loop {
            match rest {
                [] => return Ok(config),
                ["--db" | "--database", path, tail @ ..] => {
                    config.database = path.to_string();
                    rest = tail;
                }
                ["--model", model_id, tail @ ..] => {
                    config.model = model_id.to_string();
                    rest = tail;
                }
                ["--command", command, tail @ ..] => return Ok(config.with_command(command, tail)),
                [flag @ ("--db" | "--database" | "--model" | "--command")] => {
                    return Err(format!("{flag} requires a value"));
                }
                [flag, ..] if flag.starts_with('-') => return Err(format!("unknown flag {flag}")),
                [command, tail @ ..] => return Ok(config.with_command(command, tail)),
            }
        }
    }

    fn with_command(mut self, command: &str, command_args: &[&str]) -> Self {
        self.command = command.to_string();
        self.command_args = command_args.iter().map(|arg| arg.to_string()).collect();
        self
    }

    pub fn help() -> &'static str {
        r#"Usage: netmodel [--db memory|PATH] [--model ID] <command> [args]

Commands:
  status                         Show stored models and the selected model's size
  import --file PATH [--name N]  Import csv/tsv/json/treejson/topojson as a static table
  tables                         List tables as id:type:name
  classes                        List classes as id:type:name
  dump                           Print the canonical model dump
  graph                          Print the class graph as JSON
  tables-graph                   Print the table dependency graph as JSON
  count --table ID               Build a table and print its row count
  sample [--seed N]              Print an instance sample graph as JSON
  delete-model                   Remove the selected model from the store

Logging goes to stderr; set NETMODEL_LOG (e.g. NETMODEL_LOG=debug) to adjust.

Examples:
  netmodel --db models.db import --file people.csv
  netmodel --db models.db --model default classes
  netmodel --db models.db sample --seed 7
"#
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().cloned();
        }
    }
    None
}

fn required_flag_value(args: &[String], flag: &str) -> Result<String, ModelError> {
    if !args.iter().any(|arg| arg == flag) {
        return Err(ModelError::invalid_input(format!("{flag} is required")));
    }
    flag_value(args, flag).ok_or_else(|| ModelError::invalid_input(format!("missing value for {flag}")))
}

fn load_model(store: &dyn BlobStore, model_id: &str) -> Result<NetworkModel, ModelError> {
    NetworkModel::load(store, model_id, ModelConfig::default(), RuleRegistry::new())
}

fn load_or_create(store: &dyn BlobStore, model_id: &str) -> Result<NetworkModel, ModelError> {
    match store.get(model_id)? {
        Some(_) => load_model(store, model_id),
        None => Ok(NetworkModel::new(model_id)),
    }
}

/// Runs one command against `store` and returns what should go to stdout.
pub fn run_command(store: &dyn BlobStore, config: &CommandLineConfig) -> Result<String, ModelError> {
    let args = &config.command_args;
    match config.command.as_str() {
        "status" => {
            let stored = store.list()?;
            let (tables, classes) = match store.get(&config.model)? {
                Some(_) => {
                    let model = load_model(store, &config.model)?;
                    (model.table_ids().len(), model.class_ids().len())
                }
                None => (0, 0),
            };
            Ok(format!(
                "models={} model={} tables={tables} classes={classes}",
                stored.len(),
                config.model
            ))
        }
        "import" => {
            let path = required_flag_value(args, "--file")?;
            let text = fs::read_to_string(&path)
                .map_err(|e| ModelError::invalid_input(format!("cannot read {path}: {e}")))?;
            let file_name = std::path::Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone());
            let mut file = TextFile::from_path_name(&file_name, text);
            if let Some(name) = flag_value(args, "--name") {
                file.name = name;
            }
            let mut model = load_or_create(store, &config.model)?;
            let class_id = import_text(&mut model, &file)?;
            let table_id = model.class(&class_id)?.table_id().clone();
            let rows = model.count_rows(&table_id)?;
            model.save(store)?;
            Ok(json!({
                "command": "import",
                "class_id": class_id,
                "table_id": table_id,
                "rows": rows,
            })
            .to_string())
        }
        "tables" => {
            let model = load_model(store, &config.model)?;
            let mut lines = Vec::new();
            for table in model.tables() {
                lines.push(format!(
                    "{}:{}:{}",
                    table.table_id(),
                    table.type_tag(),
                    model.table_name(table.table_id())?
                ));
            }
            Ok(lines.join("\n"))
        }
        "classes" => {
            let model = load_model(store, &config.model)?;
            let mut lines = Vec::new();
            for class in model.classes() {
                lines.push(format!(
                    "{}:{}:{}",
                    class.class_id(),
                    class.type_tag(),
                    model.class_name(class.class_id())?
                ));
            }
            Ok(lines.join("\n"))
        }
        "dump" => load_model(store, &config.model)?.model_dump(),
        "graph" => {
            let model = load_model(store, &config.model)?;
            let options = GraphOptions {
                include_dummies: true,
                class_ids: None,
            };
            Ok(serde_json::to_string(&model.network_model_graph(&options)?)?)
        }
        "tables-graph" => {
            let model = load_model(store, &config.model)?;
            Ok(serde_json::to_string(&model.table_dependency_graph()?)?)
        }
        "count" => {
            let table_id = TableId::from(required_flag_value(args, "--table")?);
            let mut model = load_model(store, &config.model)?;
            let rows = model.count_rows(&table_id)?;
            Ok(format!("table={table_id} rows={rows}"))
        }
        "sample" => {
            let seed = match flag_value(args, "--seed") {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|_| ModelError::invalid_input(format!("--seed expects an integer, got {raw}")))?,
                None => 0,
            };
            let mut model = load_model(store, &config.model)?;
            let mut rng = StdRng::seed_from_u64(seed);
            let sample_config = model.config().sample.clone();
            let cancelled = json!({"command": "sample", "cancelled": true}).to_string();
            let Some(sample) = model.instance_sample(&sample_config, &mut rng)? else {
                return Ok(cancelled);
            };
            let BuildOutcome::Ready(filled) = model.fill_instance_sample(&sample)? else {
                return Ok(cancelled);
            };
            let BuildOutcome::Ready(graph) = model.instance_sample_to_graph(&filled)? else {
                return Ok(cancelled);
            };
            Ok(serde_json::to_string(&graph)?)
        }
        "delete-model" => {
            let deleted = store.delete(&config.model)?;
            Ok(format!("model={} deleted={deleted}", config.model))
        }
        other => Err(ModelError::invalid_input(format!("unknown command {other}"))),
    }
}

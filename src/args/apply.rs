//! The default command: load the configuration and run every plugin.

use crate::args::Args;
use crate::args::utils::parse_names;
use decman::config::desired::load_packages;
use decman::config::paths::resolve_config_dir;
use decman::config::{PACKAGES_FILE, load_settings};
use decman::modules::Module;
use decman::plugin::{ApplyOptions, PluginContext, PluginRegistry};
use decman::store::Store;

/// What: Run the selected plugins against the declared configuration.
///
/// Inputs:
/// - `args`: Parsed command-line arguments.
///
/// Output:
/// - `true` when every plugin succeeded and the store was saved.
///
/// Details:
/// - Each plugin's summary is printed to stdout.
/// - The store is saved once after all plugins ran, and never in dry runs.
pub fn handle_apply(args: &Args) -> bool {
    let dir = resolve_config_dir(args.config.as_deref());
    tracing::info!(dir = %dir.display(), "[Config] using configuration directory");
    let settings = match load_settings(&dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("decman: {e}");
            return false;
        }
    };
    let packages_path = args.packages.clone().unwrap_or_else(|| dir.join(PACKAGES_FILE));
    let declarations = match load_packages(&packages_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("decman: {e}");
            return false;
        }
    };

    let ctx = PluginContext {
        settings: settings.clone(),
        desired: declarations.desired_state(),
        echo_output: !args.quiet,
    };
    let plugins = match PluginRegistry::new().build(&ctx, &parse_names(&args.only)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("decman: {e}");
            return false;
        }
    };
    if plugins.is_empty() {
        eprintln!("decman: no plugin is available on this system");
        return false;
    }

    let mut store = match Store::load(&settings.store_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("decman: {e}");
            return false;
        }
    };

    let modules: Vec<&dyn Module> = declarations.modules.iter().map(|m| m as &dyn Module).collect();
    let opts = ApplyOptions {
        dry_run: args.dry_run,
        upgrade_devel: args.upgrade_devel,
        force: args.force,
    };

    let mut success = true;
    for mut plugin in plugins {
        let changed = plugin.process_modules(&mut store, &modules);
        if !changed.is_empty() {
            tracing::info!(plugin = %plugin.name(), modules = ?changed, "module package sets changed");
        }
        let report = plugin.apply(&mut store, opts);
        println!(":: {}{}", plugin.name(), if opts.dry_run { " (dry run)" } else { "" });
        for line in report.summary_lines() {
            println!("   {line}");
        }
        success &= report.success;
    }

    if !opts.dry_run
        && let Err(e) = store.save()
    {
        eprintln!("decman: {e}");
        success = false;
    }
    success
}

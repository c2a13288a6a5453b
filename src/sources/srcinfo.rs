//! `.SRCINFO` parsing into per-output descriptors.

use std::collections::BTreeSet;

use super::descriptor::{ForeignPackageDescriptor, SourceLocation};

#[derive(Default, Clone)]
struct Section {
    depends: Option<Vec<String>>,
    makedepends: Option<Vec<String>>,
    checkdepends: Option<Vec<String>>,
    provides: Option<Vec<String>>,
    pkgver: Option<String>,
    pkgrel: Option<String>,
    epoch: Option<String>,
}

impl Section {
    fn push(slot: &mut Option<Vec<String>>, value: &str) {
        slot.get_or_insert_with(Vec::new).push(value.to_string());
    }
}

/// What: Parse `.SRCINFO` text into one descriptor per `pkgname`.
///
/// Inputs:
/// - `text`: Output of `makepkg --printsrcinfo`.
/// - `arch`: Machine architecture; `depends_<arch>` style keys are honoured for it.
/// - `source`: Recipe location recorded on every descriptor.
///
/// Output:
/// - Descriptors sharing base, source and (unless overridden) version.
///
/// # Errors
/// - A message when `pkgbase`, `pkgver` or any `pkgname` is missing.
///
/// Details:
/// - A key set inside a `pkgname` section replaces the base value for that output.
pub fn parse_srcinfo(
    text: &str,
    arch: &str,
    source: &SourceLocation,
) -> Result<Vec<ForeignPackageDescriptor>, String> {
    let mut pkgbase: Option<String> = None;
    let mut base = Section::default();
    let mut outputs: Vec<(String, Section)> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            "pkgbase" => {
                pkgbase = Some(value.to_string());
                continue;
            }
            "pkgname" => {
                outputs.push((value.to_string(), Section::default()));
                continue;
            }
            _ => {}
        }

        let section = match outputs.last_mut() {
            Some((_, s)) => s,
            None => &mut base,
        };
        let field = key
            .strip_suffix(arch)
            .and_then(|k| k.strip_suffix('_'))
            .unwrap_or(key);
        match field {
            "pkgver" => section.pkgver = Some(value.to_string()),
            "pkgrel" => section.pkgrel = Some(value.to_string()),
            "epoch" => section.epoch = Some(value.to_string()),
            "depends" => Section::push(&mut section.depends, value),
            "makedepends" => Section::push(&mut section.makedepends, value),
            "checkdepends" => Section::push(&mut section.checkdepends, value),
            "provides" => Section::push(&mut section.provides, value),
            _ => {}
        }
    }

    let pkgbase = pkgbase.ok_or_else(|| "missing pkgbase".to_string())?;
    if base.pkgver.is_none() {
        return Err(format!("missing pkgver in base '{pkgbase}'"));
    }
    if outputs.is_empty() {
        return Err(format!("no pkgname declared in base '{pkgbase}'"));
    }

    let pick = |own: &Option<Vec<String>>, inherited: &Option<Vec<String>>| -> BTreeSet<String> {
        own.as_ref()
            .or(inherited.as_ref())
            .map(|v| v.iter().filter(|d| !d.is_empty()).cloned().collect())
            .unwrap_or_default()
    };

    Ok(outputs
        .into_iter()
        .map(|(name, own)| {
            let pkgver = own.pkgver.as_ref().or(base.pkgver.as_ref()).cloned().unwrap_or_default();
            let pkgrel = own.pkgrel.as_ref().or(base.pkgrel.as_ref());
            let epoch = own.epoch.as_ref().or(base.epoch.as_ref());
            let mut version = pkgver;
            if let Some(rel) = pkgrel {
                version = format!("{version}-{rel}");
            }
            if let Some(ep) = epoch.filter(|e| !e.is_empty() && e.as_str() != "0") {
                version = format!("{ep}:{version}");
            }
            ForeignPackageDescriptor {
                runtime_deps: pick(&own.depends, &base.depends),
                build_deps: pick(&own.makedepends, &base.makedepends),
                check_deps: pick(&own.checkdepends, &base.checkdepends),
                provides: pick(&own.provides, &base.provides),
                name,
                base: pkgbase.clone(),
                version,
                source: source.clone(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::descriptor::SourceKind;

    const SPLIT: &str = "\
pkgbase = foo
\tpkgver = 1.2
\tpkgrel = 3
\tepoch = 1
\tmakedepends = cmake
\tmakedepends_x86_64 = nasm
\tmakedepends_aarch64 = arm-only
\tcheckdepends = python-pytest
\tdepends = glibc
\tdepends_x86_64 = lib32-glibc

pkgname = foo
\tprovides = foo-virtual=1.2

pkgname = foo-docs
\tdepends =
";

    fn local() -> SourceLocation {
        SourceLocation {
            kind: SourceKind::LocalDir,
            location: "/srv/pkgbuilds/foo".into(),
        }
    }

    #[test]
    /// What: Split packages share base data and honour per-output overrides.
    ///
    /// Inputs:
    /// - A base `foo` with outputs `foo` and `foo-docs`.
    ///
    /// Output:
    /// - `foo` inherits base depends (including the x86_64 ones) and has a provides.
    /// - `foo-docs` overrides depends with an empty list.
    fn split_package_sections() {
        let descs = parse_srcinfo(SPLIT, "x86_64", &local()).expect("parse");
        assert_eq!(descs.len(), 2);

        let foo = &descs[0];
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.base, "foo");
        assert_eq!(foo.version, "1:1.2-3");
        assert!(foo.runtime_deps.contains("glibc"));
        assert!(foo.runtime_deps.contains("lib32-glibc"));
        assert!(foo.build_deps.contains("cmake"));
        assert!(foo.build_deps.contains("nasm"));
        assert!(!foo.build_deps.contains("arm-only"));
        assert!(foo.check_deps.contains("python-pytest"));
        assert!(foo.provides.contains("foo-virtual=1.2"));

        let docs = &descs[1];
        assert_eq!(docs.name, "foo-docs");
        assert!(docs.runtime_deps.is_empty());
        assert!(docs.provides.is_empty());
        assert!(docs.build_deps.contains("cmake"));
        assert_eq!(docs.source, local());
    }

    #[test]
    /// What: Missing mandatory keys are rejected.
    fn missing_fields_are_errors() {
        assert!(parse_srcinfo("pkgname = x\n", "x86_64", &local()).is_err());
        assert!(parse_srcinfo("pkgbase = x\npkgname = x\n", "x86_64", &local()).is_err());
        assert!(parse_srcinfo("pkgbase = x\npkgver = 1\n", "x86_64", &local()).is_err());
    }

    #[test]
    /// What: Versions without epoch or release are assembled as-is.
    fn version_without_epoch() {
        let text = "pkgbase = bar\npkgver = 2.0\npkgrel = 1\npkgname = bar\n";
        let descs = parse_srcinfo(text, "x86_64", &local()).expect("parse");
        assert_eq!(descs[0].version, "2.0-1");
    }
}

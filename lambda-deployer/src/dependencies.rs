//! Runtime dependency closure of a workspace package, resolved by `cargo metadata`.
//!
//! The closure is what goes under `lib/` of an archive that ships its dependencies.
//! Cargo keeps the compiled artifacts in the `deps` directory next to the binaries,
//! e.g. `target/debug/deps/libserde-1a2b3c.rlib`.

use crate::Error;
use cargo_metadata::{DependencyKind, Metadata, MetadataCommand, Node, Package, PackageId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// All packages reachable from the root package over normal dependencies, the root included.
/// Dev and build dependencies are not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyClosure {
    root: String,
    /// Package name → the name of its lib target, e.g. `md-5` → `md5`.
    /// Packages with only a binary target have no lib name.
    packages: BTreeMap<String, Option<String>>,
}

impl DependencyClosure {
    /// Runs `cargo metadata` on the workspace of `manifest_path` and walks the resolved graph from `root_package`.
    pub fn resolve(manifest_path: &Path, root_package: &str) -> Result<Self, Error> {
        let metadata = MetadataCommand::new()
            .manifest_path(manifest_path)
            .exec()
            .map_err(|e| format!("Failed to read the metadata of {}: {e}", manifest_path.display()))?;

        Self::from_metadata(&metadata, root_package)
    }

    pub fn from_metadata(metadata: &Metadata, root_package: &str) -> Result<Self, Error> {
        let resolve = metadata
            .resolve
            .as_ref()
            .ok_or("The metadata has no dependency graph. Was it read with --no-deps?")?;

        let packages_by_id = metadata.packages.iter().map(|v| (&v.id, v)).collect::<HashMap<_, _>>();
        let nodes_by_id = resolve.nodes.iter().map(|v| (&v.id, v)).collect::<HashMap<&PackageId, &Node>>();

        // a workspace member wins over a registry package with the same name
        let root = metadata
            .packages
            .iter()
            .filter(|package| package.name.to_string() == root_package)
            .max_by_key(|package| metadata.workspace_members.contains(&package.id))
            .ok_or_else(|| format!("Package {root_package} is not in the workspace metadata"))?;

        let mut packages = BTreeMap::new();
        let mut visited = Vec::new();
        let mut queue = VecDeque::from([&root.id]);

        while let Some(id) = queue.pop_front() {
            if visited.contains(&id) {
                continue;
            }
            visited.push(id);

            let package = packages_by_id
                .get(id)
                .ok_or_else(|| format!("{id} is in the dependency graph, but not in the package list"))?;
            packages.insert(package.name.to_string(), lib_name(package));

            let node = nodes_by_id
                .get(id)
                .ok_or_else(|| format!("{id} is not in the dependency graph"))?;

            queue.extend(
                node.deps
                    .iter()
                    .filter(|dep| dep.dep_kinds.iter().any(|v| v.kind == DependencyKind::Normal))
                    .map(|dep| &dep.pkg),
            );
        }

        debug!("{} packages in the runtime closure of {root_package}", packages.len());

        Ok(Self {
            root: root_package.to_owned(),
            packages,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains_key(package)
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// The crate name the package compiles to, which is also the name in its artifact files.
    pub fn lib_name(&self, package: &str) -> Option<&str> {
        self.packages.get(package)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Finds the newest compiled artifact of every package in a cargo `deps` directory.
    /// Packages without an artifact, e.g. the ones only compiled into a binary, are skipped.
    pub fn artifacts(&self, artifact_dir: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut newest: HashMap<String, (SystemTime, PathBuf)> = HashMap::new();

        for entry in std::fs::read_dir(artifact_dir)
            .map_err(|e| format!("Failed to list {}: {e}", artifact_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let crate_name = match file_name.to_str().and_then(artifact_crate_name) {
                Some(v) => v.to_owned(),
                None => continue,
            };

            let modified = entry.metadata()?.modified()?;
            let is_newer = newest
                .get(&crate_name)
                .map_or(true, |(current, _)| modified > *current);
            if is_newer {
                newest.insert(crate_name, (modified, entry.path()));
            }
        }

        let mut artifacts = Vec::with_capacity(self.packages.len());
        for (package, lib_name) in &self.packages {
            match lib_name.as_ref().and_then(|v| newest.remove(v)) {
                Some((_, path)) => artifacts.push(path),
                None => debug!("No artifact for {package} in {}", artifact_dir.display()),
            }
        }

        Ok(artifacts)
    }
}

/// Cargo names the artifacts after the lib target with dashes turned into underscores.
fn lib_name(package: &Package) -> Option<String> {
    package
        .targets
        .iter()
        .find(|target| target.is_lib() || target.is_proc_macro())
        .map(|target| target.name.replace('-', "_"))
}

/// Extracts the crate name from `lib<crate>-<hash>.rlib`, `lib<crate>-<hash>.so` or `lib<crate>.so`.
fn artifact_crate_name(file_name: &str) -> Option<&str> {
    let stem = file_name
        .strip_suffix(".rlib")
        .or_else(|| file_name.strip_suffix(".so"))?
        .strip_prefix("lib")?;

    // crate names use underscores, so a dash can only separate the metadata hash
    let name = match stem.rsplit_once('-') {
        Some((name, _hash)) => name,
        None => stem,
    };

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

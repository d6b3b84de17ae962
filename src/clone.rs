//! The clone pipeline: discover refs, then per ref fetch, unpack,
//! resolve, persist and check out. Refs are processed independently;
//! one failing ref is reported and the rest still go through.

use anyhow::{Context, Result};
use std::path::Path;

use crate::checkout;
use crate::delta;
use crate::pack;
use crate::protocol::{self, Ref};
use crate::store::ObjectStore;

struct RefOutcome {
    name: String,
    id: String,
    result: Result<RefStats>,
}

struct RefStats {
    objects: usize,
    skipped_deltas: usize,
}

pub fn clone(url: &str, dir: &Path) -> Result<()> {
    let store = ObjectStore::init_for_clone(dir)
        .with_context(|| format!("initializing {}", dir.display()))?;
    let refs = protocol::discover_refs(url).context("discovering remote refs")?;

    let mut outcomes = Vec::with_capacity(refs.len());
    for r in refs {
        let result = process_ref(url, &r, &store, dir);
        outcomes.push(RefOutcome {
            name: r.name,
            id: r.id,
            result,
        });
    }
    report(&outcomes);
    Ok(())
}

fn process_ref(url: &str, r: &Ref, store: &ObjectStore, dir: &Path) -> Result<RefStats> {
    let pack_bytes = protocol::fetch_pack(url, &r.id).context("fetching pack")?;
    let (_version, records) = pack::parse_pack(&pack_bytes).context("parsing pack")?;
    let resolution = delta::resolve(records).context("resolving deltas")?;

    for object in &resolution.objects {
        store
            .put(object.kind, &object.content)
            .with_context(|| format!("storing object {}", object.id))?;
    }
    checkout::materialize(&resolution.objects, dir).context("checking out")?;

    Ok(RefStats {
        objects: resolution.objects.len(),
        skipped_deltas: resolution.skipped.len(),
    })
}

fn report(outcomes: &[RefOutcome]) {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(stats) => {
                if stats.skipped_deltas > 0 {
                    println!(
                        "processed ref {} ({}): {} objects, {} deltas skipped",
                        outcome.id, outcome.name, stats.objects, stats.skipped_deltas
                    );
                } else {
                    println!(
                        "processed ref {} ({}): {} objects",
                        outcome.id, outcome.name, stats.objects
                    );
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("could not process ref {} ({}): {:#}", outcome.id, outcome.name, e);
            }
        }
    }
    if failed > 0 {
        eprintln!("{} of {} refs failed", failed, outcomes.len());
    }
}

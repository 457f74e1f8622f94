use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tern_jit::{CallLinkInfo, CallLinker, CallType, LinkState};

const F: u64 = 0x1000;
const G: u64 = 0x2000;
const F_ENTRY: u64 = 0xF000;
const G_ENTRY: u64 = 0xE000;

#[test]
fn test_monomorphic_site_stays_linked() {
    let linker = CallLinker::new(4);
    let info = Arc::new(CallLinkInfo::new(CallType::Call, 7));

    for _ in 0..1000 {
        // slow path only while nothing is cached
        if info.lookup(F).is_none() {
            linker.link(&info, F, F_ENTRY);
        }
    }
    assert_eq!(info.state(), LinkState::Linked);
    assert_eq!(info.relink_count(), 0);
    assert_eq!(info.lookup(F), Some(F_ENTRY));
}

#[test]
fn test_thrash_limit_from_linker() {
    let linker = CallLinker::new(3);
    let info = Arc::new(CallLinkInfo::new(CallType::Construct, 0));
    let mut states = Vec::new();
    for round in 0..6 {
        let (callee, entry) = if round % 2 == 0 { (F, F_ENTRY) } else { (G, G_ENTRY) };
        states.push(linker.link(&info, callee, entry));
    }
    assert_eq!(
        states,
        [
            LinkState::Linked,
            LinkState::Relinked,
            LinkState::Relinked,
            LinkState::Relinked,
            LinkState::PermanentlyGeneric,
            LinkState::PermanentlyGeneric,
        ]
    );
    assert_eq!(info.lookup(F), None);
    assert_eq!(info.lookup(G), None);
}

#[test]
fn test_concurrent_relinking_never_pairs_wrong_entry() {
    let linker = Arc::new(CallLinker::new(u32::MAX));
    let info = Arc::new(CallLinkInfo::new(CallType::Call, 0));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let info = Arc::clone(&info);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut hits = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    match info.lookup(F) {
                        None => {}
                        Some(entry) => {
                            assert_eq!(entry, F_ENTRY);
                            hits += 1;
                        }
                    }
                    if let Some(entry) = info.lookup(G) {
                        assert_eq!(entry, G_ENTRY);
                    }
                }
                hits
            })
        })
        .collect();

    let writers: Vec<_> = [(F, F_ENTRY), (G, G_ENTRY)]
        .into_iter()
        .map(|(callee, entry)| {
            let linker = Arc::clone(&linker);
            let info = Arc::clone(&info);
            thread::spawn(move || {
                for _ in 0..20_000 {
                    linker.link(&info, callee, entry);
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(matches!(info.state(), LinkState::Linked | LinkState::Relinked));
}

#[test]
fn test_reclaim_races_with_readers() {
    let linker = Arc::new(CallLinker::new(u32::MAX));
    let sites: Vec<_> = (0..16)
        .map(|i| Arc::new(CallLinkInfo::new(CallType::Call, i)))
        .collect();
    for site in &sites {
        linker.link(site, F, F_ENTRY);
    }

    let reader_sites = sites.clone();
    let reader = thread::spawn(move || {
        for _ in 0..10_000 {
            for site in &reader_sites {
                if let Some(entry) = site.lookup(F) {
                    assert_eq!(entry, F_ENTRY);
                }
            }
        }
    });

    assert_eq!(linker.reclaim(F_ENTRY), sites.len());
    // After reclaim returns no site may still enter the old code.
    for site in &sites {
        assert_eq!(site.state(), LinkState::Unlinked);
        assert_eq!(site.lookup(F), None);
    }
    reader.join().unwrap();

    assert_eq!(linker.link(&sites[0], F, 0xF800), LinkState::Linked);
    assert_eq!(sites[0].lookup(F), Some(0xF800));
}

#[test]
fn test_relinking_back_and_forth_never_pairs_wrong_entry() {
    // Every entry of F lies in F's page and every entry of G in G's, so a
    // reader can tell which callee a target was published for.
    fn owner(entry: u64) -> u64 {
        entry & !0xFFF
    }

    let linker = Arc::new(CallLinker::new(u32::MAX));
    let info = Arc::new(CallLinkInfo::new(CallType::Call, 0));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let info = Arc::clone(&info);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    for callee in [F, G] {
                        if let Some(entry) = info.lookup(callee) {
                            assert_eq!(owner(entry), callee, "entry {entry:#x} for {callee:#x}");
                        }
                    }
                }
            })
        })
        .collect();

    // F, G, F again with a fresh entry each time: the A-B-A pattern
    for round in 0..50_000u64 {
        let fresh = 1 + round % 0xFFE;
        linker.link(&info, F, F + fresh);
        linker.link(&info, G, G + fresh);
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(info.version() % 2, 0);
    assert_eq!(owner(info.lookup(G).unwrap()), G);
}

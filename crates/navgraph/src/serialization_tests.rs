//! Round trips of graph files through bytes and through the filesystem

use std::collections::BTreeMap;

use glam::Vec3;
use navgraph_common::{Error, Int3, Result};

use crate::nav_data::NavData;
use crate::serialization::NAVGRAPH_VERSION;
use crate::test_mesh_helpers::{corridor_nav_data, corridor_nodes, grid_nav_data, node_at};

/// Node positions mapped to the positions of their neighbours and the
/// connection costs, independent of node indices
fn connectivity(data: &NavData) -> BTreeMap<(i32, i32, i32), Vec<((i32, i32, i32), u32)>> {
    let key = |p: Int3| (p.x, p.y, p.z);
    data.nodes()
        .iter()
        .map(|(_, node)| {
            let mut neighbours: Vec<_> = node
                .connections()
                .iter()
                .map(|c| (key(data.nodes()[c.node].position), c.cost))
                .collect();
            neighbours.sort();
            (key(node.position), neighbours)
        })
        .collect()
}

#[test]
fn test_corridor_round_trip_through_file() -> Result<()> {
    let mut data = corridor_nav_data()?;
    let (a, b) = corridor_nodes(&data);
    data.nodes_mut()[a].set_penalty(250);
    data.nodes_mut()[b].set_tag(3);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("corridor.navgraph");
    data.save_to_file(&path)?;
    let loaded = NavData::load_from_file(&path)?;

    assert_eq!(loaded.graphs().len(), 1);
    assert_eq!(loaded.graphs()[0].settings(), data.graphs()[0].settings());
    assert_eq!(loaded.nodes().live_count(), 2);
    assert_eq!(connectivity(&loaded), connectivity(&data));

    let (la, lb) = corridor_nodes(&loaded);
    assert_eq!(loaded.nodes()[la].penalty(), 250);
    assert_eq!(loaded.nodes()[lb].tag(), 3);
    assert_eq!(loaded.nodes()[la].area(), data.nodes()[a].area());
    assert_eq!(loaded.portal(la, lb), data.portal(a, b));
    Ok(())
}

#[test]
fn test_loaded_graph_answers_queries() -> Result<()> {
    let data = corridor_nav_data()?;
    let loaded = NavData::deserialize(&data.serialize()?)?;

    let (a, b) = corridor_nodes(&loaded);
    assert_eq!(node_at(&loaded, Vec3::new(1.0, 0.0, 0.0)), Some(a));
    assert_eq!(node_at(&loaded, Vec3::new(10.0, 0.0, 0.0)), Some(b));

    let (hit, _) = loaded.linecast(Vec3::new(1.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0), None)?;
    assert!(!hit);
    Ok(())
}

#[test]
fn test_serialized_bytes_are_deterministic() -> Result<()> {
    let data = grid_nav_data(3, 2, 4.0)?;
    let first = data.serialize()?;
    let second = NavData::deserialize(&first)?.serialize()?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_destroyed_nodes_are_compacted_on_load() -> Result<()> {
    let mut data = grid_nav_data(2, 2, 4.0)?;
    let victim = node_at(&data, Vec3::new(1.0, 0.0, 3.0)).ok_or_else(|| Error::Pathfinding("no node".into()))?;
    data.destroy_node(victim)?;
    let before = connectivity(&data);
    assert_eq!(data.nodes().live_count(), 7);

    let loaded = NavData::deserialize(&data.serialize()?)?;
    assert_eq!(loaded.nodes().live_count(), 7);
    assert_eq!(loaded.nodes().capacity(), 7);
    assert_eq!(connectivity(&loaded), before);
    Ok(())
}

#[test]
fn test_rejects_wrong_magic() -> Result<()> {
    let mut bytes = corridor_nav_data()?.serialize()?;
    bytes[0] = b'X';
    assert!(matches!(NavData::deserialize(&bytes), Err(Error::Serialization(_))));
    Ok(())
}

#[test]
fn test_rejects_other_versions() -> Result<()> {
    let mut bytes = corridor_nav_data()?.serialize()?;
    bytes[4..8].copy_from_slice(&(NAVGRAPH_VERSION + 1).to_le_bytes());
    assert!(matches!(NavData::deserialize(&bytes), Err(Error::Serialization(_))));
    Ok(())
}

#[test]
fn test_truncated_file_is_an_error() -> Result<()> {
    let bytes = corridor_nav_data()?.serialize()?;
    for len in [3, 12, bytes.len() / 2, bytes.len() - 1] {
        assert!(NavData::deserialize(&bytes[..len]).is_err(), "length {len}");
    }
    Ok(())
}

#[test]
fn test_empty_nav_data_round_trip() -> Result<()> {
    let loaded = NavData::deserialize(&NavData::new().serialize()?)?;
    assert!(loaded.graphs().is_empty());
    assert_eq!(loaded.nodes().live_count(), 0);
    Ok(())
}

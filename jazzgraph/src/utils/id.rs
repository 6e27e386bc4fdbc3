use uuid::Uuid;

pub fn uuid_v5(ns: Uuid, name: &str) -> Uuid {
    Uuid::new_v5(&ns, name.as_bytes())
}

/// Builds the v5 name for an entity, e.g. `Artist|name=miles davis`.
fn entity_name(entity_type: &str, key_values: &[(&str, &str)]) -> String {
    let mut name = String::from(entity_type);
    for (k, v) in key_values {
        name.push('|');
        name.push_str(k);
        name.push('=');
        name.push_str(v);
    }
    name
}

/// Deterministic id for a tabular entity keyed on canonical strings.
pub fn stable_entity_id(entity_type: &str, key_values: &[(&str, &str)]) -> String {
    uuid_v5(Uuid::NAMESPACE_OID, &entity_name(entity_type, key_values)).to_string()
}

/// Graph node identity: one node per `(label, key, value)`.
pub fn stable_node_id(label: &str, key: &str, value: &str) -> Uuid {
    uuid_v5(Uuid::NAMESPACE_OID, &entity_name(label, &[(key, value)]))
}

/// Graph edge identity: endpoints plus any discriminating attributes.
pub fn stable_edge_id(
    rel_type: &str,
    from: &Uuid,
    to: &Uuid,
    discriminators: &[(&str, &str)],
) -> Uuid {
    let mut name = format!("{}|{}|{}", rel_type, from, to);
    for (k, v) in discriminators {
        name.push('|');
        name.push_str(k);
        name.push('=');
        name.push_str(v);
    }
    uuid_v5(Uuid::NAMESPACE_OID, &name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_are_stable_and_key_sensitive() {
        let a = stable_entity_id("Artist", &[("name", "john coltrane")]);
        let b = stable_entity_id("Artist", &[("name", "john coltrane")]);
        let c = stable_entity_id("Work", &[("name", "john coltrane")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn edge_id_depends_on_discriminators() {
        let from = stable_node_id("Artist", "artist_id", "a");
        let to = stable_node_id("Album", "album_id", "1");
        let leader = stable_edge_id("CREDITED", &from, &to, &[("role", "leader")]);
        let musician = stable_edge_id("CREDITED", &from, &to, &[("role", "musician")]);
        assert_ne!(leader, musician);
        assert_eq!(leader, stable_edge_id("CREDITED", &from, &to, &[("role", "leader")]));
    }
}

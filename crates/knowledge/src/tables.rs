// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Data-driven schema for the knowledge tables.
//!
//! Each knowledge kind is a family of tables sharing base columns; domain
//! tables add nothing but a name, a kind, and (for partial visibility) the
//! field projection. DDL is generated from these specs, so schema creation
//! is idempotent and uniform.

use std::collections::HashMap;

use vox_common::{MAX_MAJOR_CIVS, player_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgeKind {
    /// Static facts visible to all; upserted on a unique secondary key.
    Public { unique_key: &'static str },
    /// Turn-stamped, per-player visibility flags, append-only.
    Timed,
    /// Timed plus monotonic `Version` / `IsLatest` / `Changes` columns.
    Mutable,
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: &'static str,
    pub kind: KnowledgeKind,
    /// Fields returned when a reader has only partial visibility. Empty
    /// means partial readers see nothing but the row's existence.
    pub partial_fields: &'static [&'static str],
}

impl TableSpec {
    pub const fn public(name: &'static str, unique_key: &'static str) -> Self {
        Self {
            name,
            kind: KnowledgeKind::Public { unique_key },
            partial_fields: &[],
        }
    }

    pub const fn timed(name: &'static str) -> Self {
        Self {
            name,
            kind: KnowledgeKind::Timed,
            partial_fields: &[],
        }
    }

    pub const fn mutable(name: &'static str, partial_fields: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: KnowledgeKind::Mutable,
            partial_fields,
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for this spec.
    pub fn create_table_sql(&self) -> String {
        match self.kind {
            KnowledgeKind::Public { unique_key } => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 ID INTEGER PRIMARY KEY AUTOINCREMENT, \
                 {} TEXT NOT NULL, \
                 Data TEXT NOT NULL, \
                 CreatedAt TEXT NOT NULL)",
                self.name, unique_key
            ),
            KnowledgeKind::Timed => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 ID INTEGER PRIMARY KEY AUTOINCREMENT, \
                 Turn INTEGER NOT NULL, \
                 Key INTEGER NOT NULL, \
                 Payload TEXT NOT NULL, \
                 CreatedAt TEXT NOT NULL{})",
                self.name,
                visibility_columns_ddl()
            ),
            KnowledgeKind::Mutable => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 ID INTEGER PRIMARY KEY AUTOINCREMENT, \
                 Turn INTEGER NOT NULL, \
                 Key INTEGER NOT NULL, \
                 Payload TEXT NOT NULL, \
                 CreatedAt TEXT NOT NULL, \
                 Version INTEGER NOT NULL DEFAULT 1, \
                 IsLatest INTEGER NOT NULL DEFAULT 1, \
                 Changes TEXT{})",
                self.name,
                visibility_columns_ddl()
            ),
        }
    }

    /// The standard indexes for this spec, one per player slot for the
    /// visibility-scoped kinds.
    pub fn create_index_sql(&self) -> Vec<String> {
        match self.kind {
            KnowledgeKind::Public { unique_key } => vec![format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_{1} ON {0} ({1})",
                self.name, unique_key
            )],
            KnowledgeKind::Timed => (0..MAX_MAJOR_CIVS)
                .map(|i| {
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{0}_turn_p{1} ON {0} (Turn, {2})",
                        self.name,
                        i,
                        player_column(i)
                    )
                })
                .collect(),
            KnowledgeKind::Mutable => (0..MAX_MAJOR_CIVS)
                .map(|i| {
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{0}_key_p{1} ON {0} (Turn, Key, IsLatest, {2})",
                        self.name,
                        i,
                        player_column(i)
                    )
                })
                .collect(),
        }
    }
}

fn visibility_columns_ddl() -> String {
    let mut ddl = String::new();
    for i in 0..MAX_MAJOR_CIVS {
        ddl.push_str(&format!(", {} INTEGER NOT NULL DEFAULT 0", player_column(i)));
    }
    ddl
}

/// All knowledge tables the store knows how to create and serve.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashMap<&'static str, TableSpec>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// The stock Civ V table set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for spec in [
            TableSpec::public("PlayerInformations", "PlayerID"),
            TableSpec::public("Buildings", "Type"),
            TableSpec::public("Policies", "Type"),
            TableSpec::public("Units", "Type"),
            TableSpec::public("Technologies", "Type"),
            TableSpec::mutable("CityInformations", &["Name", "OwnerID", "X", "Y"]),
            TableSpec::mutable("PlayerOpinions", &[]),
            TableSpec::mutable("PlayerOptions", &[]),
            TableSpec::mutable("VictoryProgress", &[]),
            TableSpec::mutable("WorldCongress", &[]),
            TableSpec::timed("MilitaryReports"),
            TableSpec::timed("EspionageReports"),
            TableSpec::timed("CombatPreviews"),
        ] {
            registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: TableSpec) {
        self.tables.insert(spec.name, spec);
    }

    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_ddl_declares_all_visibility_columns() {
        let sql = TableSpec::timed("MilitaryReports").create_table_sql();
        assert!(sql.contains("Player0 INTEGER"));
        assert!(sql.contains("Player21 INTEGER"));
        assert!(!sql.contains("Player22"));
        assert!(!sql.contains("Version"));
    }

    #[test]
    fn mutable_ddl_adds_versioning_columns() {
        let sql = TableSpec::mutable("CityInformations", &[]).create_table_sql();
        assert!(sql.contains("Version INTEGER"));
        assert!(sql.contains("IsLatest INTEGER"));
        assert!(sql.contains("Changes TEXT"));
    }

    #[test]
    fn one_index_per_player_slot() {
        let spec = TableSpec::mutable("CityInformations", &[]);
        assert_eq!(spec.create_index_sql().len(), MAX_MAJOR_CIVS);
        let spec = TableSpec::public("PlayerInformations", "PlayerID");
        assert_eq!(spec.create_index_sql().len(), 1);
    }
}

// tempest_exporter - Prometheus metrics exporter for WeatherFlow Tempest stations
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::record::{FieldKind, FieldValue, Record, FIELDS};

/// Replace outdoor readings with their indoor counterparts where an indoor reading exists.
///
/// For every numeric field in [`FIELDS`] with an indoor counterpart, a non-zero indoor
/// value overwrites the base value. Indoor fields are left in the record. Because the
/// API reports a missing indoor sensor as zero, an honest `0.0` indoor reading never
/// takes effect.
pub fn resolve(mut record: Record) -> Record {
    for spec in FIELDS.iter().filter(|f| f.kind == FieldKind::Numeric) {
        let indoor = match spec.indoor_name().and_then(|name| record.numeric(&name)) {
            Some(v) if v != 0.0 => v,
            _ => continue,
        };

        if let Some(FieldValue::Numeric(base)) = record.get_mut(spec.name) {
            *base = indoor;
        }
    }

    record
}

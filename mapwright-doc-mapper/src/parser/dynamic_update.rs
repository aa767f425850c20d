// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Folds the mappers created while parsing one document into a mapping update holding the new
//! fields only, nested under the objects they belong to.
//!
//! Mappers are processed sorted by path, so that siblings are contiguous. A stack holds the
//! updates of the objects on the path of the last mapper. Objects that are left are merged
//! into their parent update.

use std::sync::Arc;

use crate::lookup::MappingLookup;
use crate::mapper::{Mapper, MappingParserContext, MergeReason, ObjectMapper, RuntimeField};
use crate::{Mapping, MappingError, MergeError};

/// Path segments of a mapper. The simple name stays whole, as it holds dots when the parent
/// does not hold sub-objects.
fn path_parts(mapper: &Mapper) -> Vec<&str> {
    let simple_name = mapper.simple_name();
    let parent_path = mapper
        .name()
        .strip_suffix(simple_name)
        .map(|parent_path| parent_path.strip_suffix('.').unwrap_or(parent_path))
        .unwrap_or_default();
    if parent_path.is_empty() {
        return vec![simple_name];
    }
    parent_path
        .split('.')
        .chain(std::iter::once(simple_name))
        .collect()
}

fn missing_intermediate(path: &str) -> MergeError {
    MergeError::Mapping(MappingError::Invalid(format!(
        "failed to build the mapping update: missing intermediate object [{path}]"
    )))
}

/// Builds the mapping update for the mappers and runtime fields created while parsing one
/// document. `None` when the document did not introduce anything.
pub(crate) fn create_dynamic_update(
    lookup: &MappingLookup,
    dynamic_mappers: &[Arc<Mapper>],
    dynamic_runtime_fields: Vec<RuntimeField>,
    ctx: &MappingParserContext,
) -> Result<Option<Mapping>, MergeError> {
    if dynamic_mappers.is_empty() && dynamic_runtime_fields.is_empty() {
        return Ok(None);
    }
    let root = lookup.root();
    let mut updates: Vec<(Vec<&str>, &Mapper)> = dynamic_mappers
        .iter()
        .map(|mapper| (path_parts(mapper), mapper.as_ref()))
        .collect();
    updates.sort_by(|(left, _), (right, _)| left.cmp(right));

    let root_update = match updates.first() {
        None => root.object().mapping_update([]),
        Some((first_parts, first)) => {
            let mut stack = vec![create_update(
                root.object(),
                first_parts,
                0,
                (*first).clone(),
                ctx,
            )?];
            let mut previous: Option<&Mapper> = None;
            for (parts, mapper) in &updates {
                if let Some(previous) = previous.filter(|previous| previous.name() == mapper.name())
                {
                    // The same field created twice in one document, once per array element
                    // for instance. Both must agree.
                    previous.merge(mapper, MergeReason::MappingUpdate, ctx)?;
                    continue;
                }
                previous = Some(*mapper);
                let common = remove_uncommon_mappers(&mut stack, parts, ctx)?;
                let common = expand_common_mappers(&mut stack, parts, common)?;
                let mut update = (*mapper).clone();
                if common < parts.len() - 1 {
                    update = create_existing_mapper_update(lookup, parts, common, update, ctx)?;
                }
                match update {
                    Mapper::Object(object) => stack.push(object),
                    other => add_to_last_mapper(&mut stack, other, true, ctx)?,
                }
            }
            pop_mappers(&mut stack, 1, true, ctx)?;
            stack.pop().ok_or_else(|| missing_intermediate(""))?
        }
    };
    let root_update = root.mapping_update(root_update.children().cloned(), dynamic_runtime_fields);
    Ok(Some(Mapping::mapping_update(root_update)))
}

/// An update of `parent` holding `mapper` under the intermediate objects `parts[index..]`
/// names. The intermediate objects must exist in `parent`.
fn create_update(
    parent: &ObjectMapper,
    parts: &[&str],
    index: usize,
    mapper: Mapper,
    ctx: &MappingParserContext,
) -> Result<ObjectMapper, MergeError> {
    let mut intermediates: Vec<ObjectMapper> = Vec::new();
    let mut previous = parent;
    for part in &parts[index..parts.len() - 1] {
        let intermediate = previous
            .child(part)
            .and_then(Mapper::as_object)
            .ok_or_else(|| missing_intermediate(part))?;
        intermediates.push(intermediate.clone());
        previous = intermediate;
    }
    let mut mapper = mapper;
    if !intermediates.is_empty() {
        add_to_last_mapper(&mut intermediates, mapper, false, ctx)?;
        pop_mappers(&mut intermediates, 1, false, ctx)?;
        mapper = Mapper::Object(intermediates.swap_remove(0));
    }
    Ok(parent.mapping_update([mapper]))
}

/// Pops the objects that are not on the path of `parts`. Returns the number of path segments
/// still on the stack.
fn remove_uncommon_mappers(
    stack: &mut Vec<ObjectMapper>,
    parts: &[&str],
    ctx: &MappingParserContext,
) -> Result<usize, MergeError> {
    let mut keep_before = 1;
    while keep_before < stack.len()
        && parts.get(keep_before - 1) == Some(&stack[keep_before].simple_name())
    {
        keep_before += 1;
    }
    pop_mappers(stack, keep_before, true, ctx)?;
    Ok(keep_before - 1)
}

/// Pushes back the objects of the path of `parts` that an earlier pop merged into the update
/// of their parent.
fn expand_common_mappers(
    stack: &mut Vec<ObjectMapper>,
    parts: &[&str],
    mut index: usize,
) -> Result<usize, MergeError> {
    while index < parts.len() - 1 {
        let Some(last) = stack.last() else {
            break;
        };
        let Some(child) = last.child(parts[index]) else {
            break;
        };
        let Mapper::Object(child) = child else {
            return Err(MergeError::KindConflict {
                field: child.name().to_string(),
            });
        };
        let child = child.clone();
        stack.push(child);
        index += 1;
    }
    Ok(index)
}

/// The update of an object that exists in the mapping but is not on the stack yet.
fn create_existing_mapper_update(
    lookup: &MappingLookup,
    parts: &[&str],
    index: usize,
    mapper: Mapper,
    ctx: &MappingParserContext,
) -> Result<Mapper, MergeError> {
    let parent_path = parts[..=index].join(".");
    let parent = lookup
        .object_mapper(&parent_path)
        .ok_or_else(|| missing_intermediate(&parent_path))?;
    create_update(parent, parts, index + 1, mapper, ctx).map(Mapper::Object)
}

fn add_to_last_mapper(
    stack: &mut [ObjectMapper],
    mapper: Mapper,
    merge: bool,
    ctx: &MappingParserContext,
) -> Result<(), MergeError> {
    let Some(last) = stack.last_mut() else {
        return Err(missing_intermediate(mapper.name()));
    };
    let mut with_new_mapper = last.mapping_update([mapper]);
    if merge {
        with_new_mapper = last.merge(&with_new_mapper, MergeReason::MappingUpdate, ctx)?;
    }
    *last = with_new_mapper;
    Ok(())
}

/// Pops the stack down to `keep_before` entries, adding each popped object to its parent.
fn pop_mappers(
    stack: &mut Vec<ObjectMapper>,
    keep_before: usize,
    merge: bool,
    ctx: &MappingParserContext,
) -> Result<(), MergeError> {
    while stack.len() > keep_before {
        let Some(object) = stack.pop() else {
            break;
        };
        add_to_last_mapper(stack, Mapper::Object(object), merge, ctx)?;
    }
    Ok(())
}

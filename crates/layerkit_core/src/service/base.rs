//! Generic entity service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points over exactly one repository.
//! - Run `ServiceHooks` around every mutation, bulk ones included.
//!
//! # Invariants
//! - Absent results surface as `ServiceError::NotFound` carrying the
//!   resource name, never as `Ok(None)` or `false`.
//! - Service APIs never bypass repository validation/persistence contracts.

use crate::model::entity::{Entity, EntityId};
use crate::model::filter::Filter;
use crate::model::page::{CursorPage, PageResult};
use crate::repo::{RepoError, RepoResult, Repository};
use crate::service::{NoHooks, ServiceError, ServiceHooks, ServiceResult};
use std::marker::PhantomData;

/// Use-case service wrapper for one entity type.
pub struct Service<E, R, H = NoHooks> {
    repo: R,
    hooks: H,
    resource: &'static str,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, R: Repository<E>> Service<E, R, NoHooks> {
    /// Creates a hook-less service using the provided repository.
    pub fn new(repo: R) -> Self {
        Self::with_hooks(repo, NoHooks)
    }
}

impl<E: Entity, R: Repository<E>, H: ServiceHooks<E>> Service<E, R, H> {
    pub fn with_hooks(repo: R, hooks: H) -> Self {
        Self {
            repo,
            hooks,
            resource: E::TABLE,
            _entity: PhantomData,
        }
    }

    /// Overrides the resource name used in `NotFound` errors.
    pub fn with_resource(mut self, resource: &'static str) -> Self {
        self.resource = resource;
        self
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Gets one active entity.
    pub fn get(&self, id: EntityId) -> ServiceResult<E> {
        self.repo
            .find_by_id(id, false)?
            .ok_or_else(|| self.not_found(id))
    }

    /// Gets one entity, optionally including soft-deleted rows.
    pub fn find(&self, id: EntityId, include_deleted: bool) -> ServiceResult<Option<E>> {
        Ok(self.repo.find_by_id(id, include_deleted)?)
    }

    pub fn get_many(&self, ids: &[EntityId], include_deleted: bool) -> ServiceResult<Vec<E>> {
        Ok(self.repo.get_many(ids, include_deleted)?)
    }

    /// Lazily streams every match; see [`Repository::get_all`].
    pub fn stream(&self, filter: &Filter) -> ServiceResult<R::Stream> {
        Ok(self.repo.get_all(filter)?)
    }

    /// Collects every match into memory.
    pub fn list(&self, filter: &Filter) -> ServiceResult<Vec<E>> {
        let items = self.repo.get_all(filter)?.collect::<RepoResult<Vec<E>>>()?;
        Ok(items)
    }

    pub fn paginate(
        &self,
        page: u32,
        page_size: u32,
        filter: &Filter,
    ) -> ServiceResult<PageResult<E>> {
        Ok(self.repo.get_paginated(page, page_size, filter)?)
    }

    pub fn paginate_by_cursor(
        &self,
        cursor: Option<&str>,
        limit: u32,
        filter: &Filter,
    ) -> ServiceResult<CursorPage<E>> {
        Ok(self.repo.get_by_cursor(cursor, limit, filter)?)
    }

    pub fn create(&self, mut draft: E::Draft) -> ServiceResult<E> {
        self.hooks.before_create(&mut draft)?;
        let entity = self.repo.create(&draft)?;
        self.hooks.after_create(&entity)?;
        Ok(entity)
    }

    /// Applies `patch` to an active entity.
    pub fn update(&self, id: EntityId, mut patch: E::Patch) -> ServiceResult<E> {
        self.hooks.before_update(id, &mut patch)?;
        let entity = self
            .repo
            .update(id, &patch)
            .map_err(|err| self.map_missing(err))?;
        self.hooks.after_update(&entity)?;
        Ok(entity)
    }

    /// Soft-deletes (or hard-deletes) an entity; `NotFound` when nothing
    /// matched.
    pub fn delete(&self, id: EntityId, hard: bool) -> ServiceResult<()> {
        self.hooks.before_delete(id, hard)?;
        if !self.repo.delete(id, hard)? {
            return Err(self.not_found(id));
        }
        self.hooks.after_delete(id, hard)
    }

    pub fn restore(&self, id: EntityId) -> ServiceResult<E> {
        self.hooks.before_restore(id)?;
        let entity = self
            .repo
            .restore(id)
            .map_err(|err| self.map_missing(err))?;
        self.hooks.after_restore(&entity)?;
        Ok(entity)
    }

    /// Creates every draft or none of them.
    pub fn bulk_create(&self, mut drafts: Vec<E::Draft>) -> ServiceResult<Vec<E>> {
        for draft in &mut drafts {
            self.hooks.before_create(draft)?;
        }
        let entities = self.repo.bulk_create(&drafts)?;
        for entity in &entities {
            self.hooks.after_create(entity)?;
        }
        Ok(entities)
    }

    /// Applies one patch to every listed active entity.
    ///
    /// `before_update` runs for each id against the one shared patch, and
    /// `after_update` for each row the patch reached.
    pub fn bulk_update(&self, ids: &[EntityId], mut patch: E::Patch) -> ServiceResult<usize> {
        for id in ids {
            self.hooks.before_update(*id, &mut patch)?;
        }
        let affected = self.repo.bulk_update(ids, &patch)?;
        if affected > 0 {
            for entity in self.repo.get_many(ids, false)? {
                self.hooks.after_update(&entity)?;
            }
        }
        Ok(affected)
    }

    pub fn bulk_delete(&self, ids: &[EntityId], hard: bool) -> ServiceResult<usize> {
        for id in ids {
            self.hooks.before_delete(*id, hard)?;
        }
        let affected = self.repo.bulk_delete(ids, hard)?;
        for id in ids {
            self.hooks.after_delete(*id, hard)?;
        }
        Ok(affected)
    }

    /// Returns the first match of `filter` or creates `draft`; the flag is
    /// `true` when a new entity was created. Races surface as `Conflict`.
    pub fn get_or_create(&self, filter: &Filter, mut draft: E::Draft) -> ServiceResult<(E, bool)> {
        self.hooks.before_create(&mut draft)?;
        let (entity, created) = self.repo.get_or_create(filter, &draft)?;
        if created {
            self.hooks.after_create(&entity)?;
        }
        Ok((entity, created))
    }

    pub fn upsert(&self, key_columns: &[&str], mut draft: E::Draft) -> ServiceResult<E> {
        self.hooks.before_upsert(&mut draft)?;
        let entity = self.repo.upsert(key_columns, &draft)?;
        self.hooks.after_upsert(&entity)?;
        Ok(entity)
    }

    pub fn exists(&self, filter: &Filter) -> ServiceResult<bool> {
        Ok(self.repo.exists(filter)?)
    }

    pub fn count(&self, filter: &Filter) -> ServiceResult<u64> {
        Ok(self.repo.count(filter)?)
    }

    fn not_found(&self, id: EntityId) -> ServiceError {
        ServiceError::NotFound {
            resource: self.resource,
            id,
        }
    }

    fn map_missing(&self, err: RepoError) -> ServiceError {
        match err {
            RepoError::NotFound { id, .. } => self.not_found(id),
            other => ServiceError::Repo(other),
        }
    }
}

// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device selection (prefer discrete GPU with timeline semaphores)
// - Logical device + graphics / compute / transfer queues
// - Memory allocator setup for helper buffers
//
// No surface or swapchain: everything here is headless.

use ash::prelude::VkResult;
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationError, MemoryLocation};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::gpu_device::{host_range, BarrierLists, GpuDevice, QueueType, SemaphoreKind, Submission};
use crate::error::{Error, Result, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices picked for each queue type
#[derive(Debug, Clone, Copy)]
struct QueueFamilies {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

impl QueueFamilies {
    /// Graphics first; compute and transfer prefer dedicated families
    fn find(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let find = |wanted: vk::QueueFlags, unwanted: vk::QueueFlags| {
            families
                .iter()
                .position(|f| f.queue_count > 0 && f.queue_flags.contains(wanted) && !f.queue_flags.intersects(unwanted))
                .map(|i| i as u32)
        };

        let graphics = find(vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty())?;
        let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);
        let transfer = find(vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            .unwrap_or(compute);

        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }

    fn get(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }

    fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Vulkan handles (order matters for drop!)
    allocator: Mutex<Option<Allocator>>,
    allocations: Mutex<HashMap<vk::Buffer, Allocation>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    families: QueueFamilies,
    queues: HashMap<u32, vk::Queue>,
    // vkQueueSubmit needs external synchronization; families may share a queue
    submit_lock: Mutex<()>,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers when installed
    pub fn new(app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }?;

        // Step 2: Create instance
        let enable_validation = enable_validation && Self::validation_available(&entry);
        let instance = Self::create_instance(&entry, app_name, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Pick physical device (GPU)
        let (physical_device, families) = Self::pick_physical_device(&instance)?;

        // Step 5: Create logical device
        let (device, queues) = Self::create_logical_device(&instance, physical_device, &families)?;

        // Step 6: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!("Queue families: {:?}", families);

        // Step 7: Create memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            allocations: Mutex::new(HashMap::new()),
            device,
            physical_device,
            instance,
            _entry: entry,
            families,
            queues,
            submit_lock: Mutex::new(()),
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() };
        let available = layers
            .map(|layers| {
                layers
                    .iter()
                    .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER)
            })
            .unwrap_or(false);
        if !available {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        available
    }

    fn create_instance(entry: &Entry, app_name: &str, enable_validation: bool) -> Result<ash::Instance> {
        let app_name_cstr =
            CString::new(app_name).map_err(|_| Error::config("application name contains a NUL byte"))?;
        let engine_name = c"vkgraph";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = vec![];
        let mut layer_names = vec![];
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }.driver("vkCreateInstance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .driver("vkCreateDebugUtilsMessengerEXT")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }.driver("vkEnumeratePhysicalDevices")?;

        if devices.is_empty() {
            return Err(Error::config("No Vulkan-capable GPU found"));
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };

            if props.api_version < vk::API_VERSION_1_2 || !Self::supports_timeline_semaphores(instance, device) {
                continue;
            }

            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

            if let Some(families) = QueueFamilies::find(&queue_families) {
                // Score device (prefer discrete GPU)
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, families));
                }
            }
        }

        best_device.ok_or_else(|| Error::config("No GPU with timeline semaphore support found"))
    }

    fn supports_timeline_semaphores(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder().push_next(&mut vulkan_12);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        vulkan_12.timeline_semaphore == vk::TRUE
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilies,
    ) -> Result<(ash::Device, HashMap<u32, vk::Queue>)> {
        let queue_priorities = [1.0];
        let unique = families.unique();
        let queue_create_infos: Vec<_> = unique
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut vulkan_12);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }.driver("vkCreateDevice")?;

        let queues = unique
            .iter()
            .map(|&family| (family, unsafe { device.get_device_queue(family, 0) }))
            .collect();

        Ok((device, queues))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(allocation_error)
    }

    fn queue(&self, queue: QueueType) -> vk::Queue {
        self.queues
            .get(&self.families.get(queue))
            .copied()
            .unwrap_or_else(vk::Queue::null)
    }

    fn has_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> bool {
        self.memory_properties.memory_types[..self.memory_properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .any(|(i, t)| type_bits & (1 << i) != 0 && t.property_flags.contains(flags))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.driver("vkDeviceWaitIdle")
    }
}

fn memory_location(flags: vk::MemoryPropertyFlags) -> MemoryLocation {
    if flags.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
        MemoryLocation::GpuToCpu
    } else if flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

fn allocation_error(err: AllocationError) -> Error {
    log::error!("gpu-allocator: {}", err);
    match err {
        AllocationError::OutOfMemory => Error::OutOfMemory(err.to_string()),
        AllocationError::NoCompatibleMemoryTypeFound => Error::NoCompatibleMemory(err.to_string()),
        other => Error::Configuration(other.to_string()),
    }
}

impl GpuDevice for VulkanDevice {
    fn queue_family_index(&self, queue: QueueType) -> u32 {
        self.families.get(queue)
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> VkResult<vk::Semaphore> {
        let (semaphore_type, initial_value) = match kind {
            SemaphoreKind::Binary => (vk::SemaphoreType::BINARY, 0),
            SemaphoreKind::Timeline { initial_value } => (vk::SemaphoreType::TIMELINE, initial_value),
        };
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(semaphore_type)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        unsafe { self.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn semaphore_counter(&self, semaphore: vk::Semaphore) -> VkResult<u64> {
        unsafe { self.device.get_semaphore_counter_value(semaphore) }
    }

    fn signal_semaphore(&self, semaphore: vk::Semaphore, value: u64) -> VkResult<()> {
        let info = vk::SemaphoreSignalInfo::builder().semaphore(semaphore).value(value);
        unsafe { self.device.signal_semaphore(&info) }
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> VkResult<()> {
        let semaphores = [semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder().semaphores(&semaphores).values(&values);
        unsafe { self.device.wait_semaphores(&info, timeout_ns) }
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        unsafe { self.device.create_event(&vk::EventCreateInfo::default(), None) }
    }

    fn destroy_event(&self, event: vk::Event) {
        unsafe { self.device.destroy_event(event, None) }
    }

    fn event_status(&self, event: vk::Event) -> VkResult<bool> {
        unsafe { self.device.get_event_status(event) }
    }

    fn set_event(&self, event: vk::Event) -> VkResult<()> {
        unsafe { self.device.set_event(event) }
    }

    fn reset_event(&self, event: vk::Event) -> VkResult<()> {
        unsafe { self.device.reset_event(event) }
    }

    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.families.get(queue));
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }?;
        buffers.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(command_buffer, &info) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    fn queue_submit(&self, queue: QueueType, submission: &Submission) -> VkResult<()> {
        let wait_semaphores: Vec<_> = submission.waits.iter().map(|w| w.semaphore).collect();
        let wait_values: Vec<_> = submission.waits.iter().map(|w| w.value).collect();
        let wait_stages: Vec<_> = submission.waits.iter().map(|w| w.stage).collect();
        let signal_semaphores: Vec<_> = submission.signals.iter().map(|s| s.semaphore).collect();
        let signal_values: Vec<_> = submission.signals.iter().map(|s| s.value).collect();

        // Binary entries ignore their value, so one value array covers mixed batches
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&submission.command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info)
            .build();

        let _guard = self.submit_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.queue(queue), &[submit_info], submission.fence)
        }
    }

    fn queue_wait_idle(&self, queue: QueueType) -> VkResult<()> {
        let _guard = self.submit_lock.lock();
        unsafe { self.device.queue_wait_idle(self.queue(queue)) }
    }

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barriers: BarrierLists<'_>) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                barriers.src_stage,
                barriers.dst_stage,
                barriers.dependency_flags,
                barriers.memory,
                barriers.buffer,
                barriers.image,
            )
        }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        contents: vk::SubpassContents,
    ) {
        unsafe { self.device.cmd_begin_render_pass(command_buffer, info, contents) }
    }

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer, contents: vk::SubpassContents) {
        unsafe { self.device.cmd_next_subpass(command_buffer, contents) }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(command_buffer, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(command_buffer, bind_point, layout, first_set, sets, &[])
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(command_buffer, layout, stages, offset, data) }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, first_binding, buffers, offsets)
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe { self.device.cmd_bind_index_buffer(command_buffer, buffer, offset, index_type) }
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(command_buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(command_buffer, x, y, z) }
    }

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        unsafe { self.device.cmd_set_event(command_buffer, event, stage) }
    }

    fn cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        unsafe { self.device.cmd_reset_event(command_buffer, event, stage) }
    }

    fn cmd_wait_events(&self, command_buffer: vk::CommandBuffer, events: &[vk::Event], barriers: BarrierLists<'_>) {
        unsafe {
            self.device.cmd_wait_events(
                command_buffer,
                events,
                barriers.src_stage,
                barriers.dst_stage,
                barriers.memory,
                barriers.buffer,
                barriers.image,
            )
        }
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: vk::MemoryPropertyFlags) -> Result<vk::Buffer> {
        if size == 0 {
            return Err(Error::config("buffer size must be greater than zero"));
        }

        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }.driver("vkCreateBuffer")?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocated: Result<Allocation> = (|| {
            if !self.has_memory_type(requirements.memory_type_bits, memory) {
                return Err(Error::NoCompatibleMemory(format!("{:?} for buffer usage {:?}", memory, usage)));
            }

            let mut allocator = self.allocator.lock();
            let allocator = allocator
                .as_mut()
                .ok_or_else(|| Error::config("allocator already released"))?;
            let allocation = allocator
                .allocate(&AllocationCreateDesc {
                    name: "vkgraph buffer",
                    requirements,
                    location: memory_location(memory),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(allocation_error)?;

            let bound = unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
                .driver("vkBindBufferMemory");
            if let Err(err) = bound {
                let _ = allocator.free(allocation);
                return Err(err);
            }
            Ok(allocation)
        })();

        match allocated {
            Ok(allocation) => {
                self.allocations.lock().insert(buffer, allocation);
                Ok(buffer)
            }
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(err)
            }
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = self.allocations.lock().remove(&buffer) {
            if let Some(allocator) = self.allocator.lock().as_mut() {
                if let Err(err) = allocator.free(allocation) {
                    log::warn!("Failed to free buffer memory: {}", err);
                }
            }
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut allocations = self.allocations.lock();
        let mapped = allocations
            .get_mut(&buffer)
            .ok_or_else(|| Error::config(format!("unknown buffer {:?}", buffer)))?
            .mapped_slice_mut()
            .ok_or_else(|| Error::config("buffer memory is not host visible"))?;

        let range = host_range(offset, data.len(), mapped.len())?;
        mapped[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, out: &mut [u8]) -> Result<()> {
        let allocations = self.allocations.lock();
        let mapped = allocations
            .get(&buffer)
            .ok_or_else(|| Error::config(format!("unknown buffer {:?}", buffer)))?
            .mapped_slice()
            .ok_or_else(|| Error::config("buffer memory is not host visible"))?;

        let range = host_range(offset, out.len(), mapped.len())?;
        out.copy_from_slice(&mapped[range]);
        Ok(())
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_compute_pipeline(&self, info: &vk::ComputePipelineCreateInfo) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, result)| result)?;
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, result)| result)?;
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        if let Some(mut allocator) = self.allocator.lock().take() {
            for (buffer, allocation) in self.allocations.lock().drain() {
                log::warn!("Buffer {:?} still alive at device teardown", buffer);
                unsafe { self.device.destroy_buffer(buffer, None) };
                let _ = allocator.free(allocation);
            }
        }

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let picked = QueueFamilies::find(&families).unwrap();
        assert_eq!((picked.graphics, picked.compute, picked.transfer), (0, 1, 2));
        assert_eq!(picked.unique(), vec![0, 1, 2]);
    }

    #[test]
    fn single_family_serves_every_queue() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let picked = QueueFamilies::find(&families).unwrap();
        assert_eq!((picked.graphics, picked.compute, picked.transfer), (0, 0, 0));
        assert_eq!(picked.unique(), vec![0]);
    }

    #[test]
    fn host_visible_memory_maps_to_upload_location() {
        assert_eq!(
            memory_location(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED),
            MemoryLocation::GpuToCpu
        );
        assert_eq!(memory_location(vk::MemoryPropertyFlags::DEVICE_LOCAL), MemoryLocation::GpuOnly);
    }
}
